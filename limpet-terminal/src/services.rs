//! Domain service clients
//!
//! Narrow async interfaces over the backend: the mutation engine and
//! replay loop only ever see these traits, so tests swap in
//! instrumented fakes. Replay uses the full-state `put_*` calls,
//! which are idempotent by contract.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

use shared::ServiceError;
use shared::error::ServiceResult;
use shared::models::{
    BusinessDay, CashMovement, CashierShift, LogEntry, Order, OrderPatch, ShiftClose, ShiftOpen,
};

/// Cashier shift operations
#[async_trait]
pub trait CashierService: Send + Sync {
    async fn open_shift(&self, req: &ShiftOpen) -> ServiceResult<CashierShift>;
    async fn close_shift(&self, shift_id: &str, req: &ShiftClose) -> ServiceResult<CashierShift>;
    async fn cash_movement(
        &self,
        shift_id: &str,
        movement: &CashMovement,
    ) -> ServiceResult<CashierShift>;
    async fn active_shift(&self) -> ServiceResult<Option<CashierShift>>;
    /// Full-state replacement, safe to repeat (offline replay)
    async fn put_shift(&self, shift: &CashierShift) -> ServiceResult<CashierShift>;
}

/// Order operations
#[async_trait]
pub trait OrderService: Send + Sync {
    async fn update_order(&self, order_id: &str, patch: &OrderPatch) -> ServiceResult<Order>;
    async fn get_order(&self, order_id: &str) -> ServiceResult<Order>;
    async fn active_orders(&self) -> ServiceResult<Vec<Order>>;
    /// Full-state replacement, safe to repeat (offline replay)
    async fn put_order(&self, order: &Order) -> ServiceResult<Order>;
}

/// Business day operations
#[async_trait]
pub trait BusinessDayService: Send + Sync {
    async fn open_day(&self) -> ServiceResult<BusinessDay>;
    async fn close_day(&self, day_id: &str) -> ServiceResult<BusinessDay>;
    async fn current_day(&self) -> ServiceResult<Option<BusinessDay>>;
    /// Full-state replacement, safe to repeat (offline replay)
    async fn put_day(&self, day: &BusinessDay) -> ServiceResult<BusinessDay>;
}

/// Telemetry ingestion (logging pipeline fallback path uses this too)
#[async_trait]
pub trait LogService: Send + Sync {
    async fn post_batch(&self, entries: &[LogEntry]) -> ServiceResult<()>;
}

/// Standard response envelope from the backend
#[derive(Debug, serde::Deserialize)]
struct ApiResponse<T> {
    #[allow(dead_code)]
    pub code: String,
    pub message: String,
    pub data: Option<T>,
}

/// HTTP implementation of every domain service
#[derive(Debug, Clone)]
pub struct HttpServices {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpServices {
    pub fn new(base_url: impl Into<String>, timeout: std::time::Duration) -> ServiceResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            token: None,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn auth_header(&self) -> Option<String> {
        self.token.as_ref().map(|t| format!("Bearer {t}"))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> ServiceResult<Option<T>> {
        let mut request = self.client.get(self.url(path));
        if let Some(auth) = self.auth_header() {
            request = request.header(reqwest::header::AUTHORIZATION, auth);
        }
        let response = request.send().await.map_err(map_reqwest_error)?;
        // An absent resource is a legitimate read result, not an error
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::handle_response(response).await
    }

    async fn request<T: DeserializeOwned, B: Serialize>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &B,
    ) -> ServiceResult<T> {
        let mut request = self.client.request(method, self.url(path)).json(body);
        if let Some(auth) = self.auth_header() {
            request = request.header(reqwest::header::AUTHORIZATION, auth);
        }
        let response = request.send().await.map_err(map_reqwest_error)?;
        Self::handle_response(response)
            .await?
            .ok_or_else(|| ServiceError::Decode("missing data in response".to_string()))
    }

    async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> ServiceResult<T> {
        self.request(reqwest::Method::POST, path, body).await
    }

    async fn put<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> ServiceResult<T> {
        self.request(reqwest::Method::PUT, path, body).await
    }

    async fn handle_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> ServiceResult<Option<T>> {
        let status = response.status();

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ServiceError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let envelope: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| ServiceError::Decode(e.to_string()))?;
        if envelope.data.is_none() && !envelope.message.is_empty() {
            tracing::debug!(message = %envelope.message, "Response carried no data");
        }
        Ok(envelope.data)
    }
}

fn map_reqwest_error(e: reqwest::Error) -> ServiceError {
    if e.is_timeout() {
        ServiceError::Timeout(e.to_string())
    } else if e.is_decode() {
        ServiceError::Decode(e.to_string())
    } else {
        ServiceError::Connection(e.to_string())
    }
}

#[async_trait]
impl CashierService for HttpServices {
    async fn open_shift(&self, req: &ShiftOpen) -> ServiceResult<CashierShift> {
        self.post("/api/shifts", req).await
    }

    async fn close_shift(&self, shift_id: &str, req: &ShiftClose) -> ServiceResult<CashierShift> {
        self.post(&format!("/api/shifts/{shift_id}/close"), req).await
    }

    async fn cash_movement(
        &self,
        shift_id: &str,
        movement: &CashMovement,
    ) -> ServiceResult<CashierShift> {
        self.post(&format!("/api/shifts/{shift_id}/movements"), movement)
            .await
    }

    async fn active_shift(&self) -> ServiceResult<Option<CashierShift>> {
        self.get("/api/shifts/active").await
    }

    async fn put_shift(&self, shift: &CashierShift) -> ServiceResult<CashierShift> {
        self.put(&format!("/api/shifts/{}", shift.id), shift).await
    }
}

#[async_trait]
impl OrderService for HttpServices {
    async fn update_order(&self, order_id: &str, patch: &OrderPatch) -> ServiceResult<Order> {
        self.request(reqwest::Method::PATCH, &format!("/api/orders/{order_id}"), patch)
            .await
    }

    async fn get_order(&self, order_id: &str) -> ServiceResult<Order> {
        self.get(&format!("/api/orders/{order_id}"))
            .await?
            .ok_or_else(|| ServiceError::Status {
                status: 404,
                message: format!("order {order_id} not found"),
            })
    }

    async fn active_orders(&self) -> ServiceResult<Vec<Order>> {
        Ok(self.get("/api/orders/active").await?.unwrap_or_default())
    }

    async fn put_order(&self, order: &Order) -> ServiceResult<Order> {
        self.put(&format!("/api/orders/{}", order.id), order).await
    }
}

#[async_trait]
impl BusinessDayService for HttpServices {
    async fn open_day(&self) -> ServiceResult<BusinessDay> {
        self.post("/api/business-days", &serde_json::json!({})).await
    }

    async fn close_day(&self, day_id: &str) -> ServiceResult<BusinessDay> {
        self.post(
            &format!("/api/business-days/{day_id}/close"),
            &serde_json::json!({}),
        )
        .await
    }

    async fn current_day(&self) -> ServiceResult<Option<BusinessDay>> {
        self.get("/api/business-days/current").await
    }

    async fn put_day(&self, day: &BusinessDay) -> ServiceResult<BusinessDay> {
        self.put(&format!("/api/business-days/{}", day.id), day).await
    }
}

#[async_trait]
impl LogService for HttpServices {
    async fn post_batch(&self, entries: &[LogEntry]) -> ServiceResult<()> {
        let mut request = self.client.post(self.url("/api/logs/batch")).json(&entries);
        if let Some(auth) = self.auth_header() {
            request = request.header(reqwest::header::AUTHORIZATION, auth);
        }
        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ServiceError::Status {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }
}
