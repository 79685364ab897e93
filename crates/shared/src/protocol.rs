use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{GroupId, MessageId, NotificationKind, UserId};

/// A chat conversation with its member list, as returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub group_id: GroupId,
    pub name: String,
    #[serde(default)]
    pub member_ids: Vec<UserId>,
}

/// One message as observed in a streaming-store snapshot.
///
/// `read_by` may grow between snapshots of the same `message_id`; the most
/// recent snapshot wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSnapshot {
    pub message_id: MessageId,
    pub group_id: GroupId,
    pub sender_id: UserId,
    pub text: String,
    #[serde(default)]
    pub read_by: Vec<UserId>,
    pub created_at: DateTime<Utc>,
}

impl MessageSnapshot {
    pub fn is_read_by(&self, user_id: &UserId) -> bool {
        self.read_by.iter().any(|reader| reader == user_id)
    }

    pub fn is_sent_by(&self, user_id: &UserId) -> bool {
        &self.sender_id == user_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: UserId,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_auth_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
    pub kind: NotificationKind,
    pub group_id: GroupId,
    pub deep_link: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRequest {
    pub recipient_user_id: UserId,
    pub title: String,
    pub body: String,
    pub data: NotificationData,
    pub channel_id: String,
}
