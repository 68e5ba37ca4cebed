//! Synchronous reservation clients.
//!
//! A client never fails past its boundary: every problem is folded into a
//! [`SoftFailureReason`], and the caller decides whether to fall back.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use common::{ProductId, RequestId};
use ledger::InventoryLedger;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::chaos::ChaosInjector;
use crate::error::FulfillmentError;
use crate::stock::{DecrementStock, StockService};

/// Body returned by the inventory service when stock is short.
pub const INSUFFICIENT_STOCK_MESSAGE: &str = "Insufficient stock";

/// What to reserve, keyed by the order's idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationRequest {
    pub product_id: ProductId,
    pub quantity: u32,
    pub request_id: RequestId,
}

/// Why a synchronous reservation did not go through.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SoftFailureReason {
    #[error("reservation timed out")]
    Timeout,
    #[error("insufficient stock")]
    InsufficientStock,
    #[error("rejected with status {status}")]
    Rejected { status: u16 },
    #[error("server error with status {status}")]
    ServerError { status: u16 },
    #[error("inventory service unreachable: {0}")]
    Unreachable(String),
}

impl SoftFailureReason {
    /// True for a business decision, false for an infrastructure problem.
    pub fn is_business_rejection(&self) -> bool {
        matches!(
            self,
            SoftFailureReason::InsufficientStock | SoftFailureReason::Rejected { .. }
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            SoftFailureReason::Timeout => "timeout",
            SoftFailureReason::InsufficientStock => "insufficient_stock",
            SoftFailureReason::Rejected { .. } => "rejected",
            SoftFailureReason::ServerError { .. } => "server_error",
            SoftFailureReason::Unreachable(_) => "unreachable",
        }
    }
}

/// Result of a synchronous reservation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservationAttempt {
    Reserved { remaining: i64 },
    SoftFailure(SoftFailureReason),
}

impl ReservationAttempt {
    pub fn label(&self) -> &'static str {
        match self {
            ReservationAttempt::Reserved { .. } => "reserved",
            ReservationAttempt::SoftFailure(reason) => reason.label(),
        }
    }
}

/// Trait for making a synchronous reservation against the inventory service.
#[async_trait]
pub trait ReservationClient: Send + Sync {
    async fn reserve(&self, request: &ReservationRequest) -> ReservationAttempt;
}

/// Calls `client` and gives up after `timeout`, dropping the in-flight call.
pub async fn reserve_within<C: ReservationClient + ?Sized>(
    client: &C,
    request: &ReservationRequest,
    timeout: Duration,
) -> ReservationAttempt {
    let started = Instant::now();
    let attempt = match tokio::time::timeout(timeout, client.reserve(request)).await {
        Ok(attempt) => attempt,
        Err(_) => ReservationAttempt::SoftFailure(SoftFailureReason::Timeout),
    };

    metrics::counter!("reservation_attempts_total", "outcome" => attempt.label()).increment(1);
    metrics::histogram!("reservation_latency_seconds").record(started.elapsed().as_secs_f64());
    attempt
}

#[derive(Debug, Deserialize)]
struct DecrementResponse {
    stock: i64,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

/// Reserves over HTTP via `POST {base_url}/inventory/decrement`.
#[derive(Debug, Clone)]
pub struct HttpReservationClient {
    http: reqwest::Client,
    decrement_url: String,
}

impl HttpReservationClient {
    pub fn new(base_url: &str) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            decrement_url: format!("{}/inventory/decrement", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl ReservationClient for HttpReservationClient {
    async fn reserve(&self, request: &ReservationRequest) -> ReservationAttempt {
        let response = match self.http.post(&self.decrement_url).json(request).send().await {
            Ok(response) => response,
            Err(err) => {
                return ReservationAttempt::SoftFailure(SoftFailureReason::Unreachable(
                    err.to_string(),
                ));
            }
        };

        let status = response.status();
        debug!(status = status.as_u16(), "Inventory service responded");

        if status.is_success() {
            return match response.json::<DecrementResponse>().await {
                Ok(body) => ReservationAttempt::Reserved {
                    remaining: body.stock,
                },
                Err(err) => ReservationAttempt::SoftFailure(SoftFailureReason::Unreachable(
                    format!("malformed response: {err}"),
                )),
            };
        }

        let reason = if status == reqwest::StatusCode::BAD_REQUEST {
            match response.json::<ErrorResponse>().await {
                Ok(body) if body.error == INSUFFICIENT_STOCK_MESSAGE => {
                    SoftFailureReason::InsufficientStock
                }
                _ => SoftFailureReason::Rejected { status: 400 },
            }
        } else if status.is_client_error() {
            SoftFailureReason::Rejected {
                status: status.as_u16(),
            }
        } else {
            SoftFailureReason::ServerError {
                status: status.as_u16(),
            }
        };
        ReservationAttempt::SoftFailure(reason)
    }
}

/// Reserves in-process against an [`InventoryLedger`].
pub struct LedgerReservationClient<L> {
    stock: StockService<L>,
    chaos: ChaosInjector,
}

impl<L: InventoryLedger> LedgerReservationClient<L> {
    pub fn new(ledger: L) -> Self {
        Self {
            stock: StockService::new(ledger),
            chaos: ChaosInjector::disabled(),
        }
    }

    pub fn with_chaos(mut self, chaos: ChaosInjector) -> Self {
        self.chaos = chaos;
        self
    }
}

#[async_trait]
impl<L: InventoryLedger> ReservationClient for LedgerReservationClient<L> {
    async fn reserve(&self, request: &ReservationRequest) -> ReservationAttempt {
        let decrement = DecrementStock {
            product_id: request.product_id.to_string(),
            quantity: i64::from(request.quantity),
            request_id: Some(request.request_id.to_string()),
        };

        match self.chaos.wrap(self.stock.decrement(decrement)).await {
            Ok(remaining) => ReservationAttempt::Reserved { remaining },
            Err(FulfillmentError::InsufficientStock { .. }) => {
                ReservationAttempt::SoftFailure(SoftFailureReason::InsufficientStock)
            }
            Err(FulfillmentError::InvalidRequest(_)) => {
                ReservationAttempt::SoftFailure(SoftFailureReason::Rejected { status: 400 })
            }
            Err(err) => ReservationAttempt::SoftFailure(SoftFailureReason::Unreachable(
                err.to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::{Json, Router};
    use ledger::InMemoryInventoryLedger;

    use super::*;
    use crate::chaos::ChaosConfig;

    fn request(quantity: u32) -> ReservationRequest {
        ReservationRequest {
            product_id: ProductId::new("SKU-001"),
            quantity,
            request_id: RequestId::new("req-1"),
        }
    }

    /// Serves a single canned response on an ephemeral port.
    async fn stub_inventory(status: StatusCode, body: serde_json::Value) -> SocketAddr {
        let app = Router::new().route(
            "/inventory/decrement",
            post(move || {
                let body = body.clone();
                async move { (status, Json(body)).into_response() }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        addr
    }

    #[test]
    fn test_business_rejection_classification() {
        assert!(SoftFailureReason::InsufficientStock.is_business_rejection());
        assert!(SoftFailureReason::Rejected { status: 422 }.is_business_rejection());
        assert!(!SoftFailureReason::Timeout.is_business_rejection());
        assert!(!SoftFailureReason::ServerError { status: 500 }.is_business_rejection());
        assert!(!SoftFailureReason::Unreachable("refused".into()).is_business_rejection());
    }

    #[test]
    fn test_request_wire_format() {
        let json = serde_json::to_value(request(3)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"productId": "SKU-001", "quantity": 3, "requestId": "req-1"})
        );
    }

    #[tokio::test]
    async fn test_ledger_client_reserves() {
        let ledger = InMemoryInventoryLedger::new();
        ledger.restock(&ProductId::new("SKU-001"), 10).await.unwrap();
        let client = LedgerReservationClient::new(ledger);

        assert_eq!(
            client.reserve(&request(3)).await,
            ReservationAttempt::Reserved { remaining: 7 }
        );
    }

    #[tokio::test]
    async fn test_ledger_client_reports_shortfall() {
        let ledger = InMemoryInventoryLedger::new();
        ledger.restock(&ProductId::new("SKU-001"), 2).await.unwrap();
        let client = LedgerReservationClient::new(ledger.clone());

        assert_eq!(
            client.reserve(&request(5)).await,
            ReservationAttempt::SoftFailure(SoftFailureReason::InsufficientStock)
        );
        assert_eq!(ledger.processed_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_drops_delayed_call_before_decrement() {
        let ledger = InMemoryInventoryLedger::new();
        ledger.restock(&ProductId::new("SKU-001"), 10).await.unwrap();
        let client = LedgerReservationClient::new(ledger.clone()).with_chaos(ChaosInjector::new(
            ChaosConfig::new(1.0, Duration::from_secs(3), Duration::from_secs(3)),
        ));

        let attempt = reserve_within(&client, &request(3), Duration::from_secs(2)).await;

        assert_eq!(
            attempt,
            ReservationAttempt::SoftFailure(SoftFailureReason::Timeout)
        );
        let item = ledger.get_item(&ProductId::new("SKU-001")).await.unwrap().unwrap();
        assert_eq!(item.quantity, 10);
    }

    #[tokio::test]
    async fn test_http_client_success() {
        let addr = stub_inventory(
            StatusCode::OK,
            serde_json::json!({"status": "success", "stock": 7}),
        )
        .await;
        let client = HttpReservationClient::new(&format!("http://{addr}/"));

        assert_eq!(
            client.reserve(&request(3)).await,
            ReservationAttempt::Reserved { remaining: 7 }
        );
    }

    #[tokio::test]
    async fn test_http_client_maps_error_statuses() {
        let cases = [
            (
                StatusCode::BAD_REQUEST,
                serde_json::json!({"error": "Insufficient stock"}),
                SoftFailureReason::InsufficientStock,
            ),
            (
                StatusCode::BAD_REQUEST,
                serde_json::json!({"error": "quantity must be a positive integer"}),
                SoftFailureReason::Rejected { status: 400 },
            ),
            (
                StatusCode::NOT_FOUND,
                serde_json::json!({"error": "nope"}),
                SoftFailureReason::Rejected { status: 404 },
            ),
            (
                StatusCode::SERVICE_UNAVAILABLE,
                serde_json::json!({"error": "down"}),
                SoftFailureReason::ServerError { status: 503 },
            ),
        ];

        for (status, body, expected) in cases {
            let addr = stub_inventory(status, body).await;
            let client = HttpReservationClient::new(&format!("http://{addr}"));
            assert_eq!(
                client.reserve(&request(3)).await,
                ReservationAttempt::SoftFailure(expected)
            );
        }
    }

    #[tokio::test]
    async fn test_http_client_unreachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = HttpReservationClient::new(&format!("http://{addr}"));
        assert!(matches!(
            client.reserve(&request(3)).await,
            ReservationAttempt::SoftFailure(SoftFailureReason::Unreachable(_))
        ));
    }
}
