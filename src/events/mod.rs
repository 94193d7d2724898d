use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is gone.
    /// Event delivery is observability, not correctness; a closed consumer
    /// must never fail an inventory mutation that already committed.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("Dropping event: {}", e);
        }
    }
}

// The events that can occur in the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Lot mutations
    LotWithdrawn {
        lot_id: Uuid,
        quantity: Decimal,
        reference_id: Uuid,
    },
    LotRestored {
        lot_id: Uuid,
        quantity: Decimal,
        reference_id: Uuid,
    },

    // Consumption outcomes
    ConsumptionCompleted {
        reference_id: Uuid,
        lots_consumed: usize,
        total_cost: Decimal,
    },
    ConsumptionRolledBack {
        reference_id: Uuid,
        reason: String,
        lots_restored: usize,
    },
    CompensationFailed {
        reference_id: Uuid,
        detail: String,
    },

    // Batch lifecycle
    BatchCreated(Uuid),
    BatchUpdated(Uuid),
    BatchCompleted {
        batch_id: Uuid,
        output_quantity: Decimal,
    },
    BatchApproved(Uuid),
    BatchRejected {
        batch_id: Uuid,
        reason: String,
    },
}

/// Drains the event channel, logging each event at a severity matching its
/// weight. Spawn this once next to the services sharing the sender.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::CompensationFailed {
                reference_id,
                detail,
            } => {
                error!(
                    %reference_id,
                    detail, "Compensation failed; manual reconciliation against the audit ledger required"
                );
            }
            Event::ConsumptionRolledBack {
                reference_id,
                reason,
                lots_restored,
            } => {
                warn!(%reference_id, reason, lots_restored, "Consumption rolled back");
            }
            Event::BatchRejected { batch_id, reason } => {
                warn!(%batch_id, reason, "Batch rejected");
            }
            other => {
                info!("Received event: {:?}", other);
            }
        }
    }

    info!("Event channel closed; processing loop exiting");
}
