//! Per-connection routing of relay replies to the request waiting for them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use nostr::Event;
use tokio::sync::{Mutex, mpsc, oneshot};
use uuid::Uuid;

/// Messages addressed to one REQ subscription.
#[derive(Debug, Clone)]
pub enum SubscriptionMessage {
    Event(Event),
    Eose,
    Closed(String),
}

/// Relay verdict on an EVENT or AUTH we sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OkStatus {
    pub accepted: bool,
    pub message: String,
}

pub fn generate_subscription_id() -> String {
    Uuid::new_v4().simple().to_string()[..16].to_string()
}

/// A registered wait for the relay's OK on one event id.
pub struct OkWaiter {
    ticket: u64,
    pub rx: oneshot::Receiver<OkStatus>,
}

impl OkWaiter {
    pub fn ticket(&self) -> u64 {
        self.ticket
    }
}

/// Open subscriptions and unanswered EVENT/AUTH sends for one connection.
///
/// Several sends of the same event id on one connection share the relay's
/// single OK: every waiter registered for that id receives it.
#[derive(Default)]
pub struct SubscriptionRegistry {
    subscriptions: Mutex<HashMap<String, mpsc::UnboundedSender<SubscriptionMessage>>>,
    pending_ok: Mutex<HashMap<String, Vec<(u64, oneshot::Sender<OkStatus>)>>>,
    next_ticket: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        subscription_id: &str,
    ) -> mpsc::UnboundedReceiver<SubscriptionMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscriptions
            .lock()
            .await
            .insert(subscription_id.to_string(), tx);
        rx
    }

    pub async fn remove(&self, subscription_id: &str) {
        self.subscriptions.lock().await.remove(subscription_id);
    }

    /// Deliver to the subscription; returns false when nobody is listening.
    pub async fn dispatch(&self, subscription_id: &str, message: SubscriptionMessage) -> bool {
        let subscriptions = self.subscriptions.lock().await;
        match subscriptions.get(subscription_id) {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    pub async fn expect_ok(&self, event_id: &str) -> OkWaiter {
        let (tx, rx) = oneshot::channel();
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        self.pending_ok
            .lock()
            .await
            .entry(event_id.to_string())
            .or_default()
            .push((ticket, tx));
        OkWaiter { ticket, rx }
    }

    /// Drop one waiter, leaving others for the same event id in place.
    pub async fn forget_ok(&self, event_id: &str, ticket: u64) {
        let mut pending = self.pending_ok.lock().await;
        if let Some(waiters) = pending.get_mut(event_id) {
            waiters.retain(|(waiter, _)| *waiter != ticket);
            if waiters.is_empty() {
                pending.remove(event_id);
            }
        }
    }

    /// Deliver the verdict to every waiter; returns false when nobody was waiting.
    pub async fn resolve_ok(&self, event_id: &str, status: OkStatus) -> bool {
        let Some(waiters) = self.pending_ok.lock().await.remove(event_id) else {
            return false;
        };
        let mut delivered = false;
        for (_, tx) in waiters {
            delivered |= tx.send(status.clone()).is_ok();
        }
        delivered
    }

    /// Drop every waiter so pending requests observe the disconnect.
    pub async fn clear(&self) {
        self.subscriptions.lock().await.clear();
        self.pending_ok.lock().await.clear();
    }

    pub async fn active_subscriptions(&self) -> usize {
        self.subscriptions.lock().await.len()
    }
}
