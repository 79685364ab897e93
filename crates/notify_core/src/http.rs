use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::UserId,
    error::ApiError,
    protocol::{Group, PushRequest, UserProfile},
};
use tracing::debug;
use url::Url;

use crate::{BackendService, PushService};

fn parse_base_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim()).with_context(|| format!("invalid service url '{raw}'"))?;
    if url.cannot_be_a_base() {
        return Err(anyhow!("service url '{raw}' cannot be used as a base"));
    }
    Ok(url)
}

/// Turns a non-2xx response into an error, preferring the service's own
/// `ApiError` body when it sent one.
async fn ensure_success(response: Response, what: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ApiError>(&body) {
        Ok(api_error) => Err(api_error)
            .with_context(|| format!("{what} failed with status {status}")),
        Err(_) => Err(anyhow!("{what} failed with status {status}: {body}")),
    }
}

async fn decode<T: DeserializeOwned>(response: Response, what: &str) -> Result<T> {
    let response = ensure_success(response, what).await?;
    response
        .json::<T>()
        .await
        .with_context(|| format!("invalid {what} response body"))
}

/// Backend REST client for profile and group lookups.
pub struct HttpBackend {
    http: Client,
    base_url: Url,
}

impl HttpBackend {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            http: Client::new(),
            base_url: parse_base_url(base_url)?,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("backend url cannot be a base: {}", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl BackendService for HttpBackend {
    async fn fetch_user_profile(&self, user_id: &UserId) -> Result<UserProfile> {
        let url = self.endpoint(&["users", user_id.as_str()])?;
        debug!(user_id = %user_id, "backend: fetching profile");
        let response = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("failed to request profile {user_id}"))?;
        decode(response, "profile lookup").await
    }

    async fn fetch_user_groups(&self, principal: &UserId) -> Result<Vec<Group>> {
        let url = self.endpoint(&["users", principal.as_str(), "groups"])?;
        debug!(principal = %principal, "backend: fetching groups");
        let response = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("failed to request groups of {principal}"))?;
        decode(response, "group list").await
    }
}

/// Push gateway client; one POST per notification.
pub struct HttpPushService {
    http: Client,
    push_url: Url,
}

impl HttpPushService {
    pub fn new(push_url: &str) -> Result<Self> {
        Ok(Self {
            http: Client::new(),
            push_url: parse_base_url(push_url)?,
        })
    }
}

#[async_trait]
impl PushService for HttpPushService {
    async fn send_push(&self, request: PushRequest) -> Result<()> {
        let recipient = request.recipient_user_id.clone();
        let response = self
            .http
            .post(self.push_url.clone())
            .json(&request)
            .send()
            .await
            .with_context(|| format!("failed to reach push service for {recipient}"))?;
        ensure_success(response, "push delivery").await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/http_tests.rs"]
mod tests;
