/// Typed error hierarchy for backend RPC calls.
/// A failed call is recoverable: it is reported to the client as a
/// structured error payload and never tears down the connection.
#[derive(Clone, Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    #[error("backend call failed ({code}): {message}")]
    Call { code: String, message: String },

    #[error("invalid backend response: {0}")]
    InvalidResponse(String),

    #[error("backend call timed out after {0}s")]
    Timeout(u64),
}

impl BackendError {
    /// Wire-level error code surfaced to the client.
    pub fn wire_code(&self) -> &'static str {
        match self {
            Self::Unreachable(_) => "BACKEND_UNREACHABLE",
            Self::Call { .. } => "BACKEND_ERROR",
            Self::InvalidResponse(_) => "BACKEND_BAD_REPLY",
            Self::Timeout(_) => "RELAY_TIMEOUT",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_codes() {
        assert_eq!(
            BackendError::Unreachable("refused".into()).wire_code(),
            "BACKEND_UNREACHABLE"
        );
        assert_eq!(
            BackendError::Call { code: "FOLDER_MISSING".into(), message: "no inbox".into() }
                .wire_code(),
            "BACKEND_ERROR"
        );
        assert_eq!(
            BackendError::InvalidResponse("not json".into()).wire_code(),
            "BACKEND_BAD_REPLY"
        );
        assert_eq!(BackendError::Timeout(30).wire_code(), "RELAY_TIMEOUT");
    }

    #[test]
    fn display_includes_detail() {
        let err = BackendError::Call {
            code: "FOLDER_MISSING".into(),
            message: "no inbox".into(),
        };
        assert_eq!(err.to_string(), "backend call failed (FOLDER_MISSING): no inbox");
    }
}
