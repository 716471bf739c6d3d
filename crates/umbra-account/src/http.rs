//! Request helpers shared by the ledger clients

use serde::de::DeserializeOwned;
use umbra_core::effects::{NetworkEffects, UrlRequest, UrlResponse};
use umbra_core::{Result, UmbraError};

/// Send a request, mapping transport failures into [`UmbraError`]
pub(crate) async fn send(network: &dyn NetworkEffects, request: UrlRequest) -> Result<UrlResponse> {
    let url = request.url.clone();
    let response = network.send(request).await?;
    tracing::trace!(%url, status = response.status_code, "ledger response");
    Ok(response)
}

/// 5xx is retryable, any other non-2xx status is a rejection
pub(crate) fn status_error(response: &UrlResponse, what: &str) -> UmbraError {
    if response.is_server_error() {
        UmbraError::server_unavailable(response.status_code, what)
    } else {
        UmbraError::rejected(response.status_code, what)
    }
}

/// Decode a JSON body, treating a shape mismatch as fatal
pub(crate) fn parse_body<T: DeserializeOwned>(body: &str, what: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|e| UmbraError::invalid(format!("malformed {what}: {e}")))
}

/// Join a base URL and a path without doubling the slash
pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}{path}", base_url.trim_end_matches('/'))
}
