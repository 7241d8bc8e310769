use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::{signal, sync::mpsc, sync::watch};
use tracing::{error, info};

use fulfillment_api as api;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config().context("failed to load configuration")?;
    api::config::init_tracing(&cfg.log_level, cfg.log_json);

    let db = api::db::establish_connection(&cfg)
        .await
        .context("failed to connect to the database")?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db).await.map_err(|e| {
            error!("failed running migrations: {}", e);
            e
        })?;
    }
    let db = Arc::new(db);

    let (event_tx, event_rx) = mpsc::channel(1024);
    let event_sender = api::events::EventSender::new(event_tx);
    tokio::spawn(api::events::process_events(event_rx));

    let gateway: Arc<dyn api::gateway::PaymentGateway> =
        Arc::new(api::gateway::HttpPaymentGateway::new(&cfg).context("failed to build gateway client")?);

    let services = api::handlers::AppServices::new(db.clone(), event_sender.clone(), gateway.clone(), &cfg);

    // The sweeper is the second writer over order/payment state; it gets its
    // own shutdown signal so it always stops between ticks.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = api::services::reconciliation::ReconciliationSweeper::new(
        db.clone(),
        services.orders.clone(),
        gateway,
        event_sender.clone(),
        api::services::reconciliation::SweepConfig::from_config(&cfg),
    );
    let sweeper_handle = tokio::spawn(sweeper.run(shutdown_rx));

    let state = api::AppState {
        db,
        config: cfg.clone(),
        event_sender,
        services,
    };
    let app = api::build_router(state);

    let addr = SocketAddr::new(cfg.host.parse().context("invalid host address")?, cfg.port);
    info!("fulfillment-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = sweeper_handle.await;
    info!("shutdown complete");

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
