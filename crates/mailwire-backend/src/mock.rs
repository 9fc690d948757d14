use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use mailwire_core::Identity;

use crate::client::MailBackend;
use crate::error::BackendError;

/// Pre-programmed replies for deterministic testing without a live backend.
pub enum MockReply {
    /// Return a result value.
    Value(serde_json::Value),
    /// Fail the call.
    Error(BackendError),
    /// Wait a duration, then yield the inner reply.
    Delay(Duration, Box<MockReply>),
}

impl MockReply {
    /// Convenience: wrap any reply with a delay.
    pub fn delayed(delay: Duration, inner: MockReply) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// One recorded call: method, params, and the caller's principal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedCall {
    pub method: String,
    pub params: serde_json::Value,
    pub principal: String,
}

/// Mock backend that consumes pre-programmed replies in sequence and
/// records every call for assertions.
pub struct MockMailBackend {
    replies: Mutex<VecDeque<MockReply>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockMailBackend {
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push_reply(&self, reply: MockReply) {
        self.replies.lock().push_back(reply);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl MailBackend for MockMailBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn call(
        &self,
        method: &str,
        params: &serde_json::Value,
        identity: &Identity,
    ) -> Result<serde_json::Value, BackendError> {
        self.calls.lock().push(RecordedCall {
            method: method.to_string(),
            params: params.clone(),
            principal: identity.principal.clone(),
        });

        let Some(reply) = self.replies.lock().pop_front() else {
            return Err(BackendError::InvalidResponse(format!(
                "MockMailBackend: no reply configured for call {}",
                self.call_count()
            )));
        };

        let mut current = reply;
        loop {
            match current {
                MockReply::Value(value) => return Ok(value),
                MockReply::Error(e) => return Err(e),
                MockReply::Delay(duration, inner) => {
                    tokio::time::sleep(duration).await;
                    current = *inner;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailwire_core::ids::UserId;

    fn identity() -> Identity {
        Identity::new(UserId::from_raw("user_1"), "a@x.com")
    }

    #[tokio::test]
    async fn replies_consumed_in_order() {
        let mock = MockMailBackend::new(vec![
            MockReply::Value(serde_json::json!({"n": 1})),
            MockReply::Value(serde_json::json!({"n": 2})),
        ]);

        let first = mock
            .call("list_threads", &serde_json::json!({}), &identity())
            .await
            .unwrap();
        let second = mock
            .call("list_threads", &serde_json::json!({}), &identity())
            .await
            .unwrap();

        assert_eq!(first["n"], 1);
        assert_eq!(second["n"], 2);
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn error_reply() {
        let mock = MockMailBackend::new(vec![MockReply::Error(BackendError::Unreachable(
            "refused".into(),
        ))]);

        let err = mock
            .call("list_threads", &serde_json::json!({}), &identity())
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Unreachable(_)));
    }

    #[tokio::test]
    async fn exhausted_replies_error() {
        let mock = MockMailBackend::new(vec![]);
        let err = mock
            .call("list_threads", &serde_json::json!({}), &identity())
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn calls_are_recorded() {
        let mock = MockMailBackend::new(vec![MockReply::Value(serde_json::json!(null))]);
        mock.call(
            "get_thread",
            &serde_json::json!({"thread_id": "t1"}),
            &identity(),
        )
        .await
        .unwrap();

        let calls = mock.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].method, "get_thread");
        assert_eq!(calls[0].params["thread_id"], "t1");
        assert_eq!(calls[0].principal, "a@x.com");
    }

    #[tokio::test]
    async fn delayed_reply_waits() {
        tokio::time::pause();

        let mock = MockMailBackend::new(vec![MockReply::delayed(
            Duration::from_secs(2),
            MockReply::Value(serde_json::json!({"ok": true})),
        )]);

        let params = serde_json::json!({});
        let ident = identity();
        let call = mock.call("list_threads", &params, &ident);
        tokio::pin!(call);

        // Not ready before the delay elapses.
        assert!(futures_poll_once(call.as_mut()).await.is_none());

        tokio::time::advance(Duration::from_secs(3)).await;
        let result = call.await.unwrap();
        assert_eq!(result["ok"], true);
    }

    /// Poll a future exactly once without consuming it.
    async fn futures_poll_once<F: std::future::Future + Unpin>(f: F) -> Option<F::Output> {
        let mut f = f;
        std::future::poll_fn(|cx| {
            std::task::Poll::Ready(match std::pin::Pin::new(&mut f).poll(cx) {
                std::task::Poll::Ready(v) => Some(v),
                std::task::Poll::Pending => None,
            })
        })
        .await
    }
}
