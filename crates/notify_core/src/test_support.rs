use std::{
    collections::{HashMap, HashSet},
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::StreamExt;
use shared::{
    domain::{GroupId, MessageId, UserId},
    protocol::{Group, MessageSnapshot, PushRequest, UserProfile},
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{BackendService, PushService, SnapshotStream, StreamingStore};

pub fn group(group_id: &str, members: &[&str]) -> Group {
    Group {
        group_id: GroupId::from(group_id),
        name: format!("Group {group_id}"),
        member_ids: members.iter().map(|id| UserId::from(*id)).collect(),
    }
}

pub fn profile(user_id: &str) -> UserProfile {
    UserProfile {
        user_id: UserId::from(user_id),
        display_name: format!("User {}", user_id.to_uppercase()),
        external_auth_id: Some(format!("auth|{user_id}")),
    }
}

pub fn message(
    message_id: &str,
    group_id: &str,
    sender_id: &str,
    text: &str,
    read_by: &[&str],
) -> MessageSnapshot {
    MessageSnapshot {
        message_id: MessageId::from(message_id),
        group_id: GroupId::from(group_id),
        sender_id: UserId::from(sender_id),
        text: text.to_string(),
        read_by: read_by.iter().map(|id| UserId::from(*id)).collect(),
        created_at: "2024-01-01T00:00:00Z".parse().expect("timestamp"),
    }
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), future)
        .await
        .expect("timed out")
}

pub struct FakeBackend {
    groups: Mutex<Vec<Group>>,
    fail_groups: bool,
    failing_profiles: Mutex<HashSet<UserId>>,
    profile_delay: Duration,
    profile_calls: AtomicUsize,
    group_calls: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            groups: Mutex::new(Vec::new()),
            fail_groups: false,
            failing_profiles: Mutex::new(HashSet::new()),
            profile_delay: Duration::ZERO,
            profile_calls: AtomicUsize::new(0),
            group_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_groups(self, groups: Vec<Group>) -> Self {
        self.replace_groups(groups);
        self
    }

    pub fn replace_groups(&self, groups: Vec<Group>) {
        *self.groups.lock().expect("lock") = groups;
    }

    pub fn failing_groups(mut self) -> Self {
        self.fail_groups = true;
        self
    }

    pub fn failing_profile(self, user_id: &str) -> Self {
        self.failing_profiles
            .lock()
            .expect("lock")
            .insert(UserId::from(user_id));
        self
    }

    pub fn with_profile_delay(mut self, delay: Duration) -> Self {
        self.profile_delay = delay;
        self
    }

    pub fn heal_profile(&self, user_id: &str) {
        self.failing_profiles
            .lock()
            .expect("lock")
            .remove(&UserId::from(user_id));
    }

    pub fn profile_calls(&self) -> usize {
        self.profile_calls.load(Ordering::SeqCst)
    }

    pub fn group_calls(&self) -> usize {
        self.group_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendService for FakeBackend {
    async fn fetch_user_profile(&self, user_id: &UserId) -> Result<UserProfile> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        if !self.profile_delay.is_zero() {
            tokio::time::sleep(self.profile_delay).await;
        }
        if self
            .failing_profiles
            .lock()
            .expect("lock")
            .contains(user_id)
        {
            return Err(anyhow!("profile {user_id} unavailable"));
        }
        Ok(profile(user_id.as_str()))
    }

    async fn fetch_user_groups(&self, _principal: &UserId) -> Result<Vec<Group>> {
        self.group_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_groups {
            return Err(anyhow!("group list unavailable"));
        }
        Ok(self.groups.lock().expect("lock").clone())
    }
}

#[derive(Default)]
pub struct RecordingPush {
    failing: HashSet<UserId>,
    attempts: Mutex<Vec<PushRequest>>,
    delivered: Mutex<Vec<PushRequest>>,
}

impl RecordingPush {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(mut self, user_id: &str) -> Self {
        self.failing.insert(UserId::from(user_id));
        self
    }

    pub fn attempts(&self) -> Vec<PushRequest> {
        self.attempts.lock().expect("lock").clone()
    }

    pub fn delivered(&self) -> Vec<PushRequest> {
        self.delivered.lock().expect("lock").clone()
    }

    pub fn delivered_recipients(&self) -> Vec<String> {
        let mut recipients: Vec<String> = self
            .delivered()
            .into_iter()
            .map(|request| request.recipient_user_id.0)
            .collect();
        recipients.sort();
        recipients
    }
}

#[async_trait]
impl PushService for RecordingPush {
    async fn send_push(&self, request: PushRequest) -> Result<()> {
        self.attempts.lock().expect("lock").push(request.clone());
        if self.failing.contains(&request.recipient_user_id) {
            return Err(anyhow!("device token for {} expired", request.recipient_user_id));
        }
        self.delivered.lock().expect("lock").push(request);
        Ok(())
    }
}

type SnapshotSender = mpsc::UnboundedSender<Result<Vec<MessageSnapshot>>>;

/// Streaming store whose snapshots are pushed by the test.
#[derive(Default)]
pub struct ChannelStore {
    refused: HashSet<GroupId>,
    senders: Mutex<HashMap<GroupId, SnapshotSender>>,
    subscribe_calls: AtomicUsize,
}

impl ChannelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refusing(mut self, group_id: &str) -> Self {
        self.refused.insert(GroupId::from(group_id));
        self
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    pub fn emit(&self, group_id: &str, messages: Vec<MessageSnapshot>) {
        let senders = self.senders.lock().expect("lock");
        let sender = senders
            .get(&GroupId::from(group_id))
            .expect("group is subscribed");
        sender.send(Ok(messages)).expect("listener alive");
    }

    pub fn fail(&self, group_id: &str, reason: &str) {
        let senders = self.senders.lock().expect("lock");
        if let Some(sender) = senders.get(&GroupId::from(group_id)) {
            let _ = sender.send(Err(anyhow!(reason.to_string())));
        }
    }

    pub fn is_open(&self, group_id: &str) -> bool {
        self.senders
            .lock()
            .expect("lock")
            .get(&GroupId::from(group_id))
            .is_some_and(|sender| !sender.is_closed())
    }
}

#[async_trait]
impl StreamingStore for ChannelStore {
    async fn subscribe(&self, group_id: &GroupId) -> Result<SnapshotStream> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        if self.refused.contains(group_id) {
            return Err(anyhow!("permission denied for group {group_id}"));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders
            .lock()
            .expect("lock")
            .insert(group_id.clone(), tx);
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}
