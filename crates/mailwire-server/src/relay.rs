use std::time::Duration;

use mailwire_backend::{BackendError, MailBackend};
use mailwire_core::Identity;

use crate::protocol::{WireMethod, WireRequest, WireResponse};

/// Context for a single relay operation: the connection's identity and its
/// bound backend client. Built per message and never outlives the call.
pub struct RelayContext<'a> {
    pub identity: &'a Identity,
    pub backend: &'a dyn MailBackend,
    pub timeout: Duration,
}

/// Forward one inbound frame to the backend and produce its reply frame.
///
/// Every outcome is a frame: unknown methods, backend failures, and
/// timeouts all come back as structured errors so the connection survives
/// any single bad call. Exactly one response per request.
pub async fn relay(ctx: RelayContext<'_>, request: WireRequest) -> WireResponse {
    let Some(method) = WireMethod::parse(&request.method) else {
        tracing::warn!(method = %request.method, "unknown wire method rejected");
        return WireResponse::method_not_found(request.id, &request.method);
    };

    let params = request.params.unwrap_or_else(|| serde_json::json!({}));
    let call = ctx.backend.call(method.as_str(), &params, ctx.identity);

    match tokio::time::timeout(ctx.timeout, call).await {
        Ok(Ok(result)) => WireResponse::success(request.id, result),
        Ok(Err(err)) => {
            tracing::warn!(method = %method, error = %err, "backend call failed");
            WireResponse::from_backend(request.id, &err)
        }
        Err(_) => {
            let err = BackendError::Timeout(ctx.timeout.as_secs());
            tracing::warn!(method = %method, timeout_secs = ctx.timeout.as_secs(), "backend call timed out");
            WireResponse::from_backend(request.id, &err)
        }
    }
}
