use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Domain events emitted by the services. Consumed by a single logger task
/// today; the enum is the seam a queue/webhook fan-out would attach to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated(Uuid),
    OrderPaid(Uuid),
    OrderCancelled(Uuid),
    OrderRefunded(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    PaymentLinkIssued {
        order_id: Uuid,
        link_id: String,
    },
    PaymentCaptured {
        order_id: Uuid,
        gateway_payment_id: String,
    },
    PaymentFlaggedForReview {
        payment_id: Uuid,
        order_id: Uuid,
        consecutive_failures: i32,
    },
    InventoryCommitted {
        order_id: Uuid,
    },
    InventoryRestocked {
        order_id: Uuid,
    },
    /// Money moved but stock could not follow. Requires a human.
    ConsistencyAlarm {
        order_id: Uuid,
        inventory_id: Uuid,
        quantity: i32,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Drains the event channel, logging each event at a severity matching its
/// weight. Spawned once at startup.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    while let Some(event) = rx.recv().await {
        match &event {
            Event::ConsistencyAlarm {
                order_id,
                inventory_id,
                quantity,
            } => {
                error!(
                    order_id = %order_id,
                    inventory_id = %inventory_id,
                    quantity = quantity,
                    "CONSISTENCY ALARM: payment captured but stock decrement was refused; manual intervention required"
                );
            }
            Event::PaymentFlaggedForReview {
                payment_id,
                order_id,
                consecutive_failures,
            } => {
                warn!(
                    payment_id = %payment_id,
                    order_id = %order_id,
                    consecutive_failures = consecutive_failures,
                    "payment parked for manual review"
                );
            }
            other => {
                info!(event = ?other, "domain event");
            }
        }
    }
}
