//! Single-writer hash chain over an [`AuditLedger`].
//!
//! Every append goes through one `tokio` task that owns the previous-hash
//! pointer, so concurrent requests can never interleave chain segments.
//! Callers hand events off and return immediately; a failed append is logged
//! and the chain continues from the last persisted hash.
//!
//! Another writer on the same ledger (a second server process) moves the
//! head underneath this one. The ledger reports that as a conflict; the
//! writer then reloads the head, reseals and retries.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use super::event::{AuditEvent, AuditEventBuilder, GENESIS};
use crate::AuthResult;
use crate::clock::Clock;
use crate::storage::AuditLedger;

/// Appends tried per event before it is dropped.
const APPEND_ATTEMPTS: u32 = 3;

enum Command {
    Append(AuditEvent),
    Flush(oneshot::Sender<()>),
}

/// Result of verifying a stored chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainReport {
    pub valid: bool,
    pub events: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broken_at: Option<usize>,
}

/// Handle to the audit writer task. Cheap to clone.
#[derive(Clone)]
pub struct AuditChain {
    sender: mpsc::UnboundedSender<Command>,
    ledger: Arc<dyn AuditLedger>,
    clock: Arc<dyn Clock>,
}

impl AuditChain {
    /// Seeds the chain head from the ledger's latest event (or `GENESIS`)
    /// and spawns the writer task.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Storage` if the ledger head cannot be read.
    pub async fn start(ledger: Arc<dyn AuditLedger>, clock: Arc<dyn Clock>) -> AuthResult<Self> {
        let head = ledger
            .latest()
            .await?
            .map_or_else(|| GENESIS.to_string(), |event| event.hash);
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(ledger.clone(), head, receiver));
        Ok(Self {
            sender,
            ledger,
            clock,
        })
    }

    /// Queues an event. Never fails the caller.
    pub fn record(&self, builder: AuditEventBuilder) {
        let event = builder.timestamp(self.clock.now()).build();
        if self.sender.send(Command::Append(event)).is_err() {
            tracing::warn!("audit writer stopped; event dropped");
        }
    }

    /// Waits until every event queued before this call has been handled.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(Command::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Verifies `events` in chain order. Returns the index of the first event
    /// whose link or digest does not match.
    ///
    /// # Errors
    ///
    /// Returns the broken index.
    pub fn verify(events: &[AuditEvent]) -> Result<(), usize> {
        let mut previous = GENESIS;
        for (index, event) in events.iter().enumerate() {
            if event.hash_previous != previous || !event.is_intact() {
                return Err(index);
            }
            previous = &event.hash;
        }
        Ok(())
    }

    /// Loads the whole ledger and verifies it.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Storage` if the ledger cannot be read.
    pub async fn verify_ledger(&self) -> AuthResult<ChainReport> {
        let events = self.ledger.list().await?;
        let broken_at = Self::verify(&events).err();
        Ok(ChainReport {
            valid: broken_at.is_none(),
            events: events.len(),
            broken_at,
        })
    }
}

async fn run_writer(
    ledger: Arc<dyn AuditLedger>,
    mut head: String,
    mut receiver: mpsc::UnboundedReceiver<Command>,
) {
    while let Some(command) = receiver.recv().await {
        match command {
            Command::Append(event) => append_linked(ledger.as_ref(), &mut head, event).await,
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!("audit writer stopped");
}

async fn append_linked(ledger: &dyn AuditLedger, head: &mut String, mut event: AuditEvent) {
    for attempt in 1..=APPEND_ATTEMPTS {
        event.seal(head.as_str());
        match ledger.append(&event).await {
            Ok(()) => {
                *head = event.hash;
                return;
            }
            Err(e) if e.is_conflict() => {
                tracing::warn!(
                    error = %e,
                    attempt,
                    event_id = %event.id,
                    "audit chain head moved; reloading"
                );
                match ledger.latest().await {
                    Ok(latest) => {
                        *head = latest.map_or_else(|| GENESIS.to_string(), |latest| latest.hash);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, event_id = %event.id, "failed to reload audit chain head");
                        return;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    event_id = %event.id,
                    endpoint = %event.endpoint,
                    "failed to append audit event"
                );
                return;
            }
        }
    }
    tracing::error!(
        event_id = %event.id,
        endpoint = %event.endpoint,
        "audit event dropped after repeated chain conflicts"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::storage::memory::MemoryAuditLedger;

    async fn chain() -> (AuditChain, Arc<MemoryAuditLedger>) {
        let ledger = Arc::new(MemoryAuditLedger::new());
        let chain = AuditChain::start(ledger.clone(), Arc::new(SystemClock))
            .await
            .unwrap();
        (chain, ledger)
    }

    #[tokio::test]
    async fn test_chain_verifies_end_to_end() {
        let (chain, ledger) = chain().await;
        chain.record(AuditEvent::builder("POST", "/login").status(200));
        chain.record(AuditEvent::builder("GET", "/me").actor("u1", None).status(200));
        chain.record(AuditEvent::builder("DELETE", "/sessions/1").status(403));
        chain.flush().await;

        let events = ledger.list().await.unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].hash_previous, GENESIS);
        assert_eq!(events[1].hash_previous, events[0].hash);
        assert_eq!(AuditChain::verify(&events), Ok(()));

        let report = chain.verify_ledger().await.unwrap();
        assert!(report.valid);
        assert_eq!(report.events, 3);
    }

    #[tokio::test]
    async fn test_tampering_is_detected_at_index() {
        let (chain, ledger) = chain().await;
        for _ in 0..4 {
            chain.record(AuditEvent::builder("GET", "/me"));
        }
        chain.flush().await;

        let mut events = ledger.list().await.unwrap();
        events[2].status_code = 500;
        assert_eq!(AuditChain::verify(&events), Err(2));

        let mut events = ledger.list().await.unwrap();
        events.remove(1);
        assert_eq!(AuditChain::verify(&events), Err(1));
    }

    #[tokio::test]
    async fn test_concurrent_records_form_one_linear_chain() {
        let (chain, ledger) = chain().await;
        let mut handles = Vec::new();
        for i in 0..32 {
            let chain = chain.clone();
            handles.push(tokio::spawn(async move {
                chain.record(AuditEvent::builder("GET", format!("/patients/{i}")));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        chain.flush().await;

        let events = ledger.list().await.unwrap();
        assert_eq!(events.len(), 32);
        assert_eq!(AuditChain::verify(&events), Ok(()));
    }

    #[tokio::test]
    async fn test_two_writers_share_one_ledger() {
        let ledger = Arc::new(MemoryAuditLedger::new());
        let a = AuditChain::start(ledger.clone(), Arc::new(SystemClock))
            .await
            .unwrap();
        let b = AuditChain::start(ledger.clone(), Arc::new(SystemClock))
            .await
            .unwrap();

        a.record(AuditEvent::builder("POST", "/login"));
        a.flush().await;
        for i in 0..5 {
            b.record(AuditEvent::builder("GET", format!("/patients/{i}")));
        }
        b.flush().await;
        a.record(AuditEvent::builder("POST", "/logout"));
        a.flush().await;

        let events = ledger.list().await.unwrap();
        assert_eq!(events.len(), 7);
        assert_eq!(AuditChain::verify(&events), Ok(()));
    }

    #[tokio::test]
    async fn test_restart_continues_from_latest() {
        let ledger = Arc::new(MemoryAuditLedger::new());
        let first = AuditChain::start(ledger.clone(), Arc::new(SystemClock))
            .await
            .unwrap();
        first.record(AuditEvent::builder("POST", "/login"));
        first.flush().await;

        let second = AuditChain::start(ledger.clone(), Arc::new(SystemClock))
            .await
            .unwrap();
        second.record(AuditEvent::builder("POST", "/logout"));
        second.flush().await;

        let events = ledger.list().await.unwrap();
        assert_eq!(events[1].hash_previous, events[0].hash);
        assert!(second.verify_ledger().await.unwrap().valid);
    }
}
