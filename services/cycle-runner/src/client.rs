//! Exchange API Client
//!
//! REST implementation of [`AccountGateway`] authenticated with the account's
//! API key. Account updates are streamed over a websocket (see `stream`).

use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{Credentials, RunnerSettings};
use crate::gateway::{AccountGateway, ClosePositionRequest, GatewayError, MarketOrderRequest};
use crate::stream::UpdateStream;
use crate::types::{AccountInfo, AccountUpdate, BalanceSnapshot, OrderResult, PositionSnapshot};

/// Header carrying the API key
const API_KEY_HEADER: &str = "x-api-key";

/// Client for the exchange account API
pub struct ExchangeClient {
    client: Client,
    base_url: String,
    stream_url: String,
    credentials: Credentials,
}

impl ExchangeClient {
    /// Create new exchange client
    pub fn new(settings: &RunnerSettings, credentials: Credentials) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(settings.request_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: settings.exchange_url.trim_end_matches('/').to_string(),
            stream_url: settings.stream_url.clone(),
            credentials,
        })
    }

    async fn get(&self, path: &str) -> Result<Response, GatewayError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, self.credentials.api_key())
            .send()
            .await?;
        Ok(response)
    }

    async fn submit<T: Serialize>(&self, path: &str, order: &T) -> Result<OrderResult, GatewayError> {
        let url = format!("{}{}", self.base_url, path);
        let envelope = OrderEnvelope {
            client_order_id: Uuid::new_v4().to_string(),
            order,
        };
        debug!("POST {} (client order {})", url, envelope.client_order_id);

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, self.credentials.api_key())
            .json(&envelope)
            .send()
            .await?;

        let response = ensure_success(response, true).await?;
        let result: OrderResult = response.json().await?;
        info!(
            "Order {} accepted for {}: {:?}",
            result.order_id, result.instrument, result.status
        );
        Ok(result)
    }
}

#[async_trait::async_trait]
impl AccountGateway for ExchangeClient {
    async fn fetch_me(&self) -> Result<AccountInfo, GatewayError> {
        let response = ensure_success(self.get("/api/user/me").await?, false).await?;
        Ok(response.json().await?)
    }

    async fn fetch_available_balance(&self) -> Result<BalanceSnapshot, GatewayError> {
        let response = ensure_success(self.get("/api/market/available-balance").await?, false)
            .await?;
        Ok(response.json().await?)
    }

    async fn get_position(
        &self,
        instrument: &str,
    ) -> Result<Option<PositionSnapshot>, GatewayError> {
        let response = self.get(&format!("/api/position/{}", instrument)).await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!("No position for {}", instrument);
            return Ok(None);
        }

        let response = ensure_success(response, false).await?;
        Ok(response.json().await?)
    }

    async fn create_close_position_order(
        &self,
        request: ClosePositionRequest,
    ) -> Result<OrderResult, GatewayError> {
        self.submit("/api/v2/order/close-position", &request).await
    }

    async fn create_market_order(
        &self,
        request: MarketOrderRequest,
    ) -> Result<OrderResult, GatewayError> {
        self.submit("/api/v2/order/market", &request).await
    }

    async fn subscribe_updates(&self) -> Result<mpsc::Receiver<AccountUpdate>, GatewayError> {
        UpdateStream::new(&self.stream_url, self.credentials.api_key())
            .start()
            .await
    }
}

/// Pass successful responses through, classify the rest
async fn ensure_success(response: Response, is_order: bool) -> Result<Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    Err(classify_status(status, &text, is_order))
}

/// Map a non-success HTTP status to a gateway error
pub(crate) fn classify_status(status: StatusCode, body: &str, is_order: bool) -> GatewayError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
        .unwrap_or_else(|| body.to_string());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            GatewayError::Unauthorized(format!("{} - {}", status, message))
        }
        s if s.is_client_error() && is_order => GatewayError::OrderRejected(message),
        s if s.is_server_error() => GatewayError::Transport(format!("{} - {}", status, message)),
        _ => GatewayError::InvalidResponse(format!("{} - {}", status, message)),
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderEnvelope<'a, T> {
    client_order_id: String,
    #[serde(flatten)]
    order: &'a T,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderStatus, Side, TimeInForce};
    use rust_decimal::Decimal;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> ExchangeClient {
        let settings = RunnerSettings {
            exchange_url: format!("{}/", server.uri()),
            ..RunnerSettings::default()
        };
        ExchangeClient::new(
            &settings,
            Credentials::new("0xwallet".to_string(), "test-key".to_string()),
        )
        .unwrap()
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, "", true),
            GatewayError::Unauthorized(_)
        ));
        assert_eq!(
            classify_status(
                StatusCode::BAD_REQUEST,
                r#"{"message":"insufficient margin"}"#,
                true
            ),
            GatewayError::OrderRejected("insufficient margin".to_string())
        );
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, "bad", false),
            GatewayError::InvalidResponse(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, "upstream", false),
            GatewayError::Transport(_)
        ));
    }

    #[tokio::test]
    async fn test_fetch_available_balance() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/market/available-balance"))
            .and(header("x-api-key", "test-key"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"availableBalance": "1000"})),
            )
            .mount(&server)
            .await;

        let balance = client_for(&server).fetch_available_balance().await.unwrap();
        assert_eq!(balance.available_balance, Decimal::from(1000));
    }

    #[tokio::test]
    async fn test_get_position_missing_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/position/BTCUSDT:DEMO"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let position = client_for(&server).get_position("BTCUSDT:DEMO").await.unwrap();
        assert!(position.is_none());
    }

    #[tokio::test]
    async fn test_get_position() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/position/BTCUSDT:DEMO"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "instrument": "BTCUSDT:DEMO",
                "quantity": "5",
                "avgPrice": "61000.5",
                "leverage": 100
            })))
            .mount(&server)
            .await;

        let position = client_for(&server)
            .get_position("BTCUSDT:DEMO")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(position.quantity, Decimal::from(5));
        assert_eq!(position.leverage, Some(100));
    }

    #[tokio::test]
    async fn test_market_order_submission() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/order/market"))
            .and(header("x-api-key", "test-key"))
            .and(body_partial_json(json!({
                "instrument": "BTCUSDT:DEMO",
                "side": "BUY",
                "cashQuantity": "900",
                "timeInForce": "FOK",
                "leverage": 100
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "orderId": "ord-1",
                "instrument": "BTCUSDT:DEMO",
                "status": "FILLED"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let result = client_for(&server)
            .create_market_order(MarketOrderRequest {
                instrument: "BTCUSDT:DEMO".to_string(),
                side: Side::Buy,
                cash_quantity: Decimal::from(900),
                time_in_force: TimeInForce::Fok,
                leverage: 100,
            })
            .await
            .unwrap();

        assert_eq!(result.order_id, "ord-1");
        assert_eq!(result.status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn test_close_order_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/order/close-position"))
            .respond_with(
                ResponseTemplate::new(422)
                    .set_body_json(json!({"message": "position already closed"})),
            )
            .mount(&server)
            .await;

        let err = client_for(&server)
            .create_close_position_order(ClosePositionRequest {
                instrument: "BTCUSDT:DEMO".to_string(),
                leverage: 100,
                quantity: Decimal::from(5),
            })
            .await
            .unwrap_err();

        assert_eq!(
            err,
            GatewayError::OrderRejected("position already closed".to_string())
        );
    }

    #[tokio::test]
    async fn test_subscribe_updates_fails_on_unreachable_stream() {
        let settings = RunnerSettings {
            stream_url: "ws://127.0.0.1:1/ws".to_string(),
            ..RunnerSettings::default()
        };
        let client = ExchangeClient::new(
            &settings,
            Credentials::new("0xwallet".to_string(), "test-key".to_string()),
        )
        .unwrap();

        let err = client.subscribe_updates().await.unwrap_err();
        assert!(matches!(err, GatewayError::Transport(_)));
    }

    #[tokio::test]
    async fn test_unauthorized_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/user/me"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let err = client_for(&server).fetch_me().await.unwrap_err();
        assert!(matches!(err, GatewayError::Unauthorized(_)));
    }
}
