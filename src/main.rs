use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::signal;
use tracing::{info, warn};

use billing_engine as engine;
use engine::notifications::{HttpNotifier, LogNotifier, NotificationPort};
use engine::prelude::*;
use engine::sinks::{InMemoryRevenueLedger, JsonlAuditSink, LogAccessGrantor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = engine::config::load_config()?;
    engine::config::init_tracing(cfg.log_level(), cfg.log_json);

    let gateway: Arc<dyn PaymentGateway> = Arc::new(PayOsClient::new(cfg.gateway.clone()));

    let notifier: Arc<dyn NotificationPort> = match &cfg.notify_relay_url {
        Some(url) => Arc::new(HttpNotifier::new(url.clone())),
        None => {
            warn!("no notify relay configured; notifications are log-only");
            Arc::new(LogNotifier)
        }
    };

    let ledger = Arc::new(InMemoryRevenueLedger::new());
    let access = Arc::new(LogAccessGrantor);
    let audit: Arc<dyn AuditSink> = Arc::new(JsonlAuditSink::open(&cfg.audit_log_path).await?);

    let invoice_registry = Arc::new(InvoiceRegistry::new());
    let refund_registry = Arc::new(RefundRegistry::new());

    let invoices = Arc::new(InvoiceService::new(
        Arc::clone(&invoice_registry),
        Arc::clone(&gateway),
        Arc::clone(&notifier),
        ledger.clone(),
        access,
        Arc::clone(&audit),
        InvoiceSettings::from(&cfg),
    ));
    let refunds = Arc::new(RefundService::new(
        refund_registry,
        Arc::clone(&notifier),
        ledger,
        Arc::clone(&audit),
        cfg.staff_channel_id.clone(),
    ));

    let sweeper = ExpirationSweeper::new(
        Arc::clone(&invoices),
        Duration::from_secs(cfg.sweep_interval_secs),
    )
    .start();

    let app = engine::handlers::router(engine::handlers::AppState {
        invoices,
        refunds,
        gateway,
    });

    let addr = SocketAddr::new(cfg.host.parse()?, cfg.port);
    info!("billing-engine listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // In-flight webhook handling has drained; end the sweeper last.
    sweeper.stop().await;
    info!("billing-engine shut down cleanly");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
