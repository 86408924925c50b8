use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::clock::Clock;
use crate::limits::MAX_INBOX_LEN;
use crate::model::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Info,
    Success,
    Error,
}

/// What the engine asks the sink to deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRequest {
    pub recipient: UserId,
    pub title: String,
    pub body: String,
    pub kind: NotificationKind,
}

impl NotificationRequest {
    pub fn new(recipient: impl Into<UserId>, title: &str, body: String, kind: NotificationKind) -> Self {
        Self {
            recipient: recipient.into(),
            title: title.to_string(),
            body,
            kind,
        }
    }
}

/// A delivered notification record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Ulid,
    pub recipient: UserId,
    pub title: String,
    pub body: String,
    pub kind: NotificationKind,
    pub read: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification sink unavailable: {0}")]
    Unavailable(String),
}

/// Delivery collaborator. Best effort: the engine logs failures and moves on.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, request: NotificationRequest) -> Result<(), NotifyError>;
}

/// Per-recipient inboxes held in memory. Clients poll them; nothing is pushed.
pub struct NotifyHub {
    inboxes: DashMap<UserId, VecDeque<Notification>>,
    clock: Arc<dyn Clock>,
}

impl NotifyHub {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inboxes: DashMap::new(),
            clock,
        }
    }

    /// Newest first.
    pub fn inbox(&self, recipient: &str) -> Vec<Notification> {
        self.inboxes
            .get(recipient)
            .map(|q| q.iter().rev().cloned().collect())
            .unwrap_or_default()
    }

    pub fn unread_count(&self, recipient: &str) -> usize {
        self.inboxes
            .get(recipient)
            .map(|q| q.iter().filter(|n| !n.read).count())
            .unwrap_or(0)
    }

    /// Returns false if the recipient has no such notification.
    pub fn mark_read(&self, recipient: &str, id: Ulid) -> bool {
        let Some(mut q) = self.inboxes.get_mut(recipient) else {
            return false;
        };
        match q.iter_mut().find(|n| n.id == id) {
            Some(n) => {
                n.read = true;
                true
            }
            None => false,
        }
    }

    /// Returns how many were unread.
    pub fn mark_all_read(&self, recipient: &str) -> usize {
        let Some(mut q) = self.inboxes.get_mut(recipient) else {
            return 0;
        };
        let mut changed = 0;
        for n in q.iter_mut().filter(|n| !n.read) {
            n.read = true;
            changed += 1;
        }
        changed
    }
}

#[async_trait]
impl NotificationSink for NotifyHub {
    async fn notify(&self, request: NotificationRequest) -> Result<(), NotifyError> {
        let notification = Notification {
            id: Ulid::new(),
            recipient: request.recipient,
            title: request.title,
            body: request.body,
            kind: request.kind,
            read: false,
            created_at: self.clock.now(),
        };
        let mut q = self.inboxes.entry(notification.recipient.clone()).or_default();
        if q.len() >= MAX_INBOX_LEN {
            q.pop_front();
        }
        q.push_back(notification);
        Ok(())
    }
}
