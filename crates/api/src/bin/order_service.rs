//! Order service entry point.

use std::sync::Arc;

use api::config::{Config, Service};
use api::telemetry;
use common::NOTIFICATION_QUEUE;
use fulfillment::{HttpReservationClient, NotificationHandler, OrderIntake};
use ledger::PostgresOrderLedger;
use queue::{PostgresConnector, QueueConsumer, SupervisedBroker};
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;

#[tokio::main]
async fn main() {
    // 1. Configuration and telemetry
    let config = Config::from_env(Service::Order);
    telemetry::init_tracing(&config);
    let metrics_handle =
        telemetry::install_metrics().expect("failed to install Prometheus recorder");

    // 2. Order ledger
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");
    ledger::run_migrations(&pool)
        .await
        .expect("failed to run migrations");
    let orders = PostgresOrderLedger::new(pool);

    // 3. Supervised queue connection; a failed first attempt is retried by the supervisor
    let broker = SupervisedBroker::new(
        PostgresConnector::new(&config.database_url).with_lease(config.queue_lease),
        config.supervisor_config(),
    );
    if let Err(err) = broker.connect().await {
        tracing::warn!(error = %err, "queue not reachable at startup, orders needing fallback will be refused");
    }

    // 4. Background workers
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let supervisor = tokio::spawn({
        let broker = broker.clone();
        let shutdown = shutdown_rx.clone();
        async move { broker.run(shutdown).await }
    });
    let notifications = QueueConsumer::new(
        broker.clone(),
        NotificationHandler::new(orders.clone()),
        NOTIFICATION_QUEUE,
    )
    .with_config(config.consumer_config());
    let consumer = tokio::spawn(async move { notifications.run(shutdown_rx).await });

    // 5. Build the application
    let client = HttpReservationClient::new(&config.inventory_service_url);
    let intake = Arc::new(
        OrderIntake::new(orders, client, broker).with_config(config.intake_config()),
    );
    let app = api::create_order_app(intake, metrics_handle);

    // 6. Start server
    let addr = config.addr();
    tracing::info!(%addr, inventory = %config.inventory_service_url, "starting order service");

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
    tracing::info!("order service shut down gracefully");
}
