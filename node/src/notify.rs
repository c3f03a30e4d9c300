//! # Payer Notifications
//!
//! Fire-and-forget delivery of settlement outcomes. The ledger publishes a
//! [`LedgerEvent`] after each committed approval or rejection; this task
//! forwards it to the payer. Delivery failures never reach the ledger.

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use blackbox_ledger::LedgerEvent;

use crate::metrics::SharedMetrics;

/// Spawn the dispatcher. It runs until the ledger's sender is dropped.
pub fn spawn_dispatcher(
    mut events: broadcast::Receiver<LedgerEvent>,
    metrics: SharedMetrics,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    deliver(&event);
                    metrics.notifications_total.inc();
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "notification dispatcher lagged, events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
        tracing::debug!("notification dispatcher stopped");
    })
}

/// Hand one event to the payer's channel. Logged only for now.
fn deliver(event: &LedgerEvent) {
    match event {
        LedgerEvent::TransferApproved {
            transaction_id,
            payer_id,
            settled_amount,
            surplus,
        } => tracing::info!(
            payer = %payer_id,
            transaction = %transaction_id,
            settled_amount,
            surplus,
            "payer notified: transfer approved"
        ),
        LedgerEvent::TransferRejected {
            transaction_id,
            payer_id,
        } => tracing::info!(
            payer = %payer_id,
            transaction = %transaction_id,
            "payer notified: transfer rejected"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::NodeMetrics;
    use std::sync::Arc;

    #[tokio::test]
    async fn counts_events_until_closed() {
        let (tx, rx) = broadcast::channel(8);
        let metrics = Arc::new(NodeMetrics::new().unwrap());
        let handle = spawn_dispatcher(rx, Arc::clone(&metrics));

        tx.send(LedgerEvent::TransferRejected {
            transaction_id: "txn-1".into(),
            payer_id: "u1".into(),
        })
        .unwrap();
        tx.send(LedgerEvent::TransferApproved {
            transaction_id: "txn-2".into(),
            payer_id: "u2".into(),
            settled_amount: 500,
            surplus: 0,
        })
        .unwrap();
        drop(tx);

        handle.await.unwrap();
        assert_eq!(metrics.notifications_total.get(), 2);
    }
}
