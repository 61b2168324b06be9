use std::sync::Arc;

use tracing::{trace, warn};

use crate::{
    registry::{ClientRegistry, ClientSendFailure, Delivery, Message},
    sample::Sample,
};

/// The outcome of one broadcast round.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// How many clients were in the snapshot.
    pub recipients: usize,

    /// How many clients got the message queued.
    pub delivered: usize,

    /// How many clients were behind and missed the message.
    pub lagged: usize,

    /// Clients which are gone. They have been removed from the registry.
    pub failed: Vec<ClientSendFailure>,
}

/// Send a sample to everyone currently registered.
///
/// The sample is serialized once. Each client is tried independently, and
/// clients which can no longer receive anything are removed from the registry.
/// Per-client problems are reported, never returned as errors.
pub async fn broadcast(registry: &ClientRegistry, sample: &Sample) -> BroadcastReport {
    let clients = registry.snapshot().await;

    if clients.is_empty() {
        trace!("No clients, skipping broadcast");
        return BroadcastReport::default();
    }

    let message: Message = match sample.to_json() {
        Ok(json) => Arc::from(json),
        Err(e) => {
            // A map of strings to integers always serializes.
            warn!(?e, %sample, "Could not serialize sample");
            return BroadcastReport::default();
        }
    };

    let mut report = BroadcastReport {
        recipients: clients.len(),
        ..Default::default()
    };

    for client in &clients {
        match client.try_send(&message) {
            Ok(Delivery::Queued) => report.delivered += 1,
            Ok(Delivery::Lagged) => {
                warn!(%client, "Client is behind, dropping sample for it");
                report.lagged += 1;
            }
            Err(failure) => {
                warn!(%failure, "Send failed");
                report.failed.push(failure);
            }
        }
    }

    for failure in &report.failed {
        registry.remove(failure.id).await;
    }

    trace!(
        recipients = report.recipients,
        delivered = report.delivered,
        "Broadcasted {message}"
    );

    report
}
