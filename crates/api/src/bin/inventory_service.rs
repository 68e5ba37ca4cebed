//! Inventory service entry point.

use std::sync::Arc;

use api::config::{Config, Service};
use api::telemetry;
use common::RESERVATION_QUEUE;
use fulfillment::{ChaosInjector, ReservationHandler, StockService};
use ledger::PostgresInventoryLedger;
use queue::{PostgresConnector, QueueConsumer, SupervisedBroker};
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;

#[tokio::main]
async fn main() {
    // 1. Configuration and telemetry
    let config = Config::from_env(Service::Inventory);
    telemetry::init_tracing(&config);
    let metrics_handle =
        telemetry::install_metrics().expect("failed to install Prometheus recorder");

    // 2. Inventory ledger
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");
    ledger::run_migrations(&pool)
        .await
        .expect("failed to run migrations");
    let inventory = PostgresInventoryLedger::new(pool);

    // 3. Supervised queue connection
    let broker = SupervisedBroker::new(
        PostgresConnector::new(&config.database_url).with_lease(config.queue_lease),
        config.supervisor_config(),
    );
    if let Err(err) = broker.connect().await {
        tracing::warn!(error = %err, "queue not reachable at startup, consumer will wait");
    }

    // 4. Background workers
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let supervisor = tokio::spawn({
        let broker = broker.clone();
        let shutdown = shutdown_rx.clone();
        async move { broker.run(shutdown).await }
    });
    let reservations = QueueConsumer::new(
        broker.clone(),
        ReservationHandler::new(inventory.clone(), broker),
        RESERVATION_QUEUE,
    )
    .with_config(config.consumer_config());
    let consumer = tokio::spawn(async move { reservations.run(shutdown_rx).await });

    // 5. Build the application
    let chaos = ChaosInjector::new(config.chaos);
    if chaos.is_enabled() {
        tracing::warn!(chaos = ?chaos.config(), "chaos injection enabled on /inventory/decrement");
    }
    let app = api::create_inventory_app(
        Arc::new(StockService::new(inventory)),
        chaos,
        metrics_handle,
    );

    // 6. Start server
    let addr = config.addr();
    tracing::info!(%addr, "starting inventory service");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(telemetry::shutdown_signal())
        .await
        .expect("server error");

    // 7. Stop workers
    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(supervisor, consumer);
    tracing::info!("inventory service shut down gracefully");
}
