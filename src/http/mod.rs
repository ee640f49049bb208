//! REST backends for a hosted identity service and its table API.

mod config;
mod data_store;
mod gateway;

pub use config::GatewayConfig;
pub use data_store::RestDataStore;
pub use gateway::{HttpGateway, TokenResponse};

use serde_json::Value;

use crate::error::Error;

/// Checks HTTP response status; returns the response on success or an error
/// carrying the service's own message.
async fn ensure_success(
    response: reqwest::Response,
    operation: &'static str,
) -> Result<reqwest::Response, Error> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(Error::RateLimited);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::Service {
        operation,
        status: Some(status.as_u16()),
        detail: error_detail(&body),
    })
}

/// Human-readable message from an error body, falling back to the raw text.
fn error_detail(body: &str) -> String {
    let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(body) else {
        return body.trim().to_owned();
    };
    ["msg", "error_description", "message", "error"]
        .iter()
        .find_map(|key| fields.get(*key).and_then(Value::as_str))
        .map_or_else(|| body.trim().to_owned(), str::to_owned)
}
