use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

/// Settlement lifecycle events, published after the corresponding state
/// transition has been persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated(Uuid),
    OrderApproved(Uuid),
    OrderExpired(Uuid),
    OrderCancelled {
        order_id: Uuid,
        reason: String,
    },
    OrderPaid {
        order_id: Uuid,
        amount: Decimal,
        currency: String,
    },
    PayoutSent {
        order_id: Uuid,
        payout_batch_id: String,
    },
    PayoutFailed(Uuid),
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously. Event delivery is fire-and-forget;
    /// callers log failures but never fail a request on them.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Drains the event channel and logs each event. Runs for the lifetime of
/// the process; exits when all senders are dropped.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        info!(event = ?event, "settlement event");
    }
    info!("event channel closed; event processor stopping");
}
