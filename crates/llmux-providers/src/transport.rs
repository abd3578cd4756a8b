//! HTTP plumbing shared by the adapters.
//!
//! Every network await races the caller's cancellation token so a cancelled
//! call fails promptly instead of waiting for the vendor.

use std::future::Future;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use llmux_core::{ProviderError, ProviderResult};

/// Build a client whose connection phase is bounded by `timeout`.
///
/// The whole-request timeout is applied per request on non-streaming calls
/// only, so long streams are not cut off.
pub(crate) fn build_client(timeout: Duration) -> Client {
    Client::builder()
        .connect_timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            warn!("Failed to build HTTP client, using defaults: {}", e);
            Client::new()
        })
}

/// Await `fut` unless `cancel` fires first.
pub(crate) async fn cancellable<F, T>(provider: &str, cancel: &CancellationToken, fut: F) -> ProviderResult<T>
where
    F: Future<Output = ProviderResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProviderError::cancelled(provider)),
        result = fut => result,
    }
}

/// Send a request and fail with [`ProviderError::Upstream`] on a
/// non-success status.
pub(crate) async fn send(
    provider: &str,
    cancel: &CancellationToken,
    request: RequestBuilder,
) -> ProviderResult<Response> {
    let response = cancellable(provider, cancel, async {
        request.send().await.map_err(|e| transport_error(provider, e))
    })
    .await?;

    let status = response.status();
    if !status.is_success() {
        let body = cancellable(provider, cancel, async { Ok(response.text().await.unwrap_or_default()) }).await?;
        error!("{} API error: {} - {}", provider, status, body);
        return Err(ProviderError::upstream(provider, status.as_u16(), body));
    }

    Ok(response)
}

/// Read a success body, returning both the typed value and the raw JSON.
pub(crate) async fn read_json<T: DeserializeOwned>(
    provider: &str,
    cancel: &CancellationToken,
    response: Response,
) -> ProviderResult<(T, serde_json::Value)> {
    let body = cancellable(provider, cancel, async {
        response.text().await.map_err(|e| transport_error(provider, e))
    })
    .await?;

    let raw: serde_json::Value =
        serde_json::from_str(&body).map_err(|e| ProviderError::malformed(provider, e))?;
    let typed = T::deserialize(&raw).map_err(|e| ProviderError::malformed(provider, e))?;
    Ok((typed, raw))
}

/// Serialize a wire request and merge vendor-specific extra parameters.
///
/// Extra parameters only fill keys the translated request does not set.
pub(crate) fn encode_body<T: Serialize>(
    provider: &str,
    request: &T,
    extra: &serde_json::Map<String, serde_json::Value>,
) -> ProviderResult<serde_json::Value> {
    let mut body = serde_json::to_value(request)
        .map_err(|e| ProviderError::malformed(provider, format!("failed to encode request: {}", e)))?;
    if let serde_json::Value::Object(ref mut map) = body {
        for (key, value) in extra {
            map.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
    Ok(body)
}

fn transport_error(provider: &str, e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::transport(provider, format!("request timed out: {}", e))
    } else {
        ProviderError::transport(provider, e)
    }
}
