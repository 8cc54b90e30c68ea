use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use crate::services::InvoiceService;

/// Periodic background task that cancels timed-out pending invoices.
///
/// A webhook completing an invoice inside the same tick window is safe:
/// both paths go through the registry's atomic check-and-set, so exactly
/// one transition wins and the loser is a no-op.
pub struct ExpirationSweeper {
    service: Arc<InvoiceService>,
    interval: Duration,
}

/// Running sweeper. Dropping the handle leaves the task running; call
/// [`stop`] during shutdown to end it and wait for the final tick.
///
/// [`stop`]: SweeperHandle::stop
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

impl ExpirationSweeper {
    pub fn new(service: Arc<InvoiceService>, interval: Duration) -> Self {
        Self { service, interval }
    }

    pub fn start(self) -> SweeperHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        sweep_once(&self.service).await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("expiration sweeper stopped");
        });

        SweeperHandle { shutdown, task }
    }
}

/// Scans the registry once and cancels every pending invoice whose expiry
/// has passed. A failure on one invoice never blocks the rest of the
/// sweep. Returns the number of invoices cancelled.
#[instrument(skip(service))]
pub async fn sweep_once(service: &InvoiceService) -> usize {
    let expired = service.registry().expired_pending(Utc::now());
    if expired.is_empty() {
        return 0;
    }

    let mut cancelled = 0;
    for invoice_id in expired {
        if service.cancel_payment(&invoice_id, "Invoice expired").await {
            cancelled += 1;
        }
    }

    info!(cancelled, "expiration sweep finished");
    cancelled
}
