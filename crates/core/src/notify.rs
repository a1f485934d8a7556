//! Post-commit notifications.
//!
//! Operations enqueue [`Notification`]s into the store's outbox inside their
//! unit of work. Dispatch happens only after commit, through a
//! [`NotificationDispatcher`], and never affects the committed transition.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::actor::ActorId;
use crate::domain::EntityRef;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    RequestCreated,
    RequestNegotiating,
    RequestAccepted,
    RequestRejected,
    RequestReopened,
    RequestExpired,
    RequestPurchased,
    SlotActivated,
    SlotRejected,
    SlotCompleted,
    SlotCancelled,
    RefundRequested,
    RefundProposed,
    RefundApproved,
    RefundRejected,
}

impl NotificationKind {
    pub const ALL: [NotificationKind; 15] = [
        NotificationKind::RequestCreated,
        NotificationKind::RequestNegotiating,
        NotificationKind::RequestAccepted,
        NotificationKind::RequestRejected,
        NotificationKind::RequestReopened,
        NotificationKind::RequestExpired,
        NotificationKind::RequestPurchased,
        NotificationKind::SlotActivated,
        NotificationKind::SlotRejected,
        NotificationKind::SlotCompleted,
        NotificationKind::SlotCancelled,
        NotificationKind::RefundRequested,
        NotificationKind::RefundProposed,
        NotificationKind::RefundApproved,
        NotificationKind::RefundRejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequestCreated => "request_created",
            Self::RequestNegotiating => "request_negotiating",
            Self::RequestAccepted => "request_accepted",
            Self::RequestRejected => "request_rejected",
            Self::RequestReopened => "request_reopened",
            Self::RequestExpired => "request_expired",
            Self::RequestPurchased => "request_purchased",
            Self::SlotActivated => "slot_activated",
            Self::SlotRejected => "slot_rejected",
            Self::SlotCompleted => "slot_completed",
            Self::SlotCancelled => "slot_cancelled",
            Self::RefundRequested => "refund_requested",
            Self::RefundProposed => "refund_proposed",
            Self::RefundApproved => "refund_approved",
            Self::RefundRejected => "refund_rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub kind: NotificationKind,
    pub entity: EntityRef,
    pub recipients: Vec<ActorId>,
    pub summary: String,
    pub correlation_id: String,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        kind: NotificationKind,
        entity: EntityRef,
        recipients: impl IntoIterator<Item = ActorId>,
        summary: impl Into<String>,
        correlation_id: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let mut unique: Vec<ActorId> = Vec::new();
        for recipient in recipients {
            if !unique.contains(&recipient) {
                unique.push(recipient);
            }
        }
        Self {
            id: format!("NTF-{}", Uuid::new_v4().simple()),
            kind,
            entity,
            recipients: unique,
            summary: summary.into(),
            correlation_id: correlation_id.into(),
            created_at,
        }
    }
}

/// Fire-and-forget delivery; implementations must not block or fail the
/// caller.
pub trait NotificationDispatcher: Send + Sync {
    fn dispatch(&self, notification: &Notification);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotificationDispatcher;

impl NotificationDispatcher for TracingNotificationDispatcher {
    fn dispatch(&self, notification: &Notification) {
        info!(
            event_name = "notification.dispatched",
            notification_id = %notification.id,
            kind = notification.kind.as_str(),
            entity = %notification.entity,
            recipients = notification.recipients.len(),
            correlation_id = %notification.correlation_id,
            "{}",
            notification.summary
        );
    }
}

/// Hands notifications to an async consumer task.
#[derive(Clone, Debug)]
pub struct ChannelNotificationDispatcher {
    sender: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotificationDispatcher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl NotificationDispatcher for ChannelNotificationDispatcher {
    fn dispatch(&self, notification: &Notification) {
        if self.sender.send(notification.clone()).is_err() {
            warn!(
                event_name = "notification.channel_closed",
                notification_id = %notification.id,
                correlation_id = %notification.correlation_id,
                "notification receiver dropped; notification stays in outbox"
            );
        }
    }
}

#[derive(Clone, Default)]
pub struct InMemoryNotificationDispatcher {
    delivered: Arc<Mutex<Vec<Notification>>>,
}

impl InMemoryNotificationDispatcher {
    pub fn delivered(&self) -> Vec<Notification> {
        match self.delivered.lock() {
            Ok(delivered) => delivered.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn kinds(&self) -> Vec<NotificationKind> {
        self.delivered().into_iter().map(|notification| notification.kind).collect()
    }
}

impl NotificationDispatcher for InMemoryNotificationDispatcher {
    fn dispatch(&self, notification: &Notification) {
        match self.delivered.lock() {
            Ok(mut delivered) => delivered.push(notification.clone()),
            Err(poisoned) => poisoned.into_inner().push(notification.clone()),
        }
    }
}
