use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::instrument;

use mailwire_core::Identity;

use crate::error::BackendError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client-side interface to the backend mail-processing service.
///
/// One call carries one method invocation and produces exactly one reply.
/// Implementations are bound to a single connection and never shared
/// across connections.
#[async_trait]
pub trait MailBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn call(
        &self,
        method: &str,
        params: &serde_json::Value,
        identity: &Identity,
    ) -> Result<serde_json::Value, BackendError>;
}

/// Shape of an error reply from the backend service.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// HTTP transport to the backend service. Each call POSTs a JSON envelope
/// `{method, params, principal}` and the reply body is the bare result.
pub struct HttpMailBackend {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpMailBackend {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl MailBackend for HttpMailBackend {
    fn name(&self) -> &str {
        "http"
    }

    #[instrument(skip(self, params, identity), fields(principal = %identity.principal))]
    async fn call(
        &self,
        method: &str,
        params: &serde_json::Value,
        identity: &Identity,
    ) -> Result<serde_json::Value, BackendError> {
        let envelope = serde_json::json!({
            "method": method,
            "params": params,
            "principal": identity.principal,
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&envelope)
            .send()
            .await
            .map_err(|e| BackendError::Unreachable(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| BackendError::Unreachable(e.to_string()))?;

        if !status.is_success() {
            return Err(match serde_json::from_str::<ErrorBody>(&body) {
                Ok(err) => BackendError::Call {
                    code: err.code,
                    message: err.message,
                },
                Err(_) => BackendError::Call {
                    code: format!("HTTP_{}", status.as_u16()),
                    message: body,
                },
            });
        }

        serde_json::from_str(&body).map_err(|e| BackendError::InvalidResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::Router;
    use mailwire_core::ids::UserId;

    fn identity() -> Identity {
        Identity::new(UserId::from_raw("user_1"), "a@x.com")
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });
        format!("http://{addr}/rpc")
    }

    #[tokio::test]
    async fn call_returns_bare_result() {
        let router = Router::new().route(
            "/rpc",
            post(|body: axum::Json<serde_json::Value>| async move {
                assert_eq!(body.0["method"], "list_threads");
                assert_eq!(body.0["principal"], "a@x.com");
                axum::Json(serde_json::json!({"threads": []}))
            }),
        );
        let endpoint = serve(router).await;

        let backend = HttpMailBackend::new(endpoint);
        let result = backend
            .call(
                "list_threads",
                &serde_json::json!({"folder": "inbox"}),
                &identity(),
            )
            .await
            .unwrap();

        assert_eq!(result, serde_json::json!({"threads": []}));
    }

    #[tokio::test]
    async fn error_status_with_structured_body() {
        let router = Router::new().route(
            "/rpc",
            post(|| async {
                (
                    axum::http::StatusCode::BAD_REQUEST,
                    axum::Json(serde_json::json!({"code": "FOLDER_MISSING", "message": "no such folder"})),
                )
            }),
        );
        let endpoint = serve(router).await;

        let backend = HttpMailBackend::new(endpoint);
        let err = backend
            .call("list_threads", &serde_json::json!({}), &identity())
            .await
            .unwrap_err();

        match err {
            BackendError::Call { code, message } => {
                assert_eq!(code, "FOLDER_MISSING");
                assert_eq!(message, "no such folder");
            }
            other => panic!("expected Call error, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn error_status_with_opaque_body() {
        let router = Router::new().route(
            "/rpc",
            post(|| async { (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let endpoint = serve(router).await;

        let backend = HttpMailBackend::new(endpoint);
        let err = backend
            .call("list_threads", &serde_json::json!({}), &identity())
            .await
            .unwrap_err();

        match err {
            BackendError::Call { code, message } => {
                assert_eq!(code, "HTTP_500");
                assert_eq!(message, "boom");
            }
            other => panic!("expected Call error, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn garbled_success_body_is_invalid_response() {
        let router = Router::new().route("/rpc", post(|| async { "not json" }));
        let endpoint = serve(router).await;

        let backend = HttpMailBackend::new(endpoint);
        let err = backend
            .call("list_threads", &serde_json::json!({}), &identity())
            .await
            .unwrap_err();

        assert!(matches!(err, BackendError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn refused_connection_is_unreachable() {
        // Port 1 is never listening.
        let backend = HttpMailBackend::new("http://127.0.0.1:1/rpc");
        let err = backend
            .call("list_threads", &serde_json::json!({}), &identity())
            .await
            .unwrap_err();

        assert!(matches!(err, BackendError::Unreachable(_)));
        assert_eq!(err.wire_code(), "BACKEND_UNREACHABLE");
    }
}
