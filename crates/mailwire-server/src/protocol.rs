use serde::{Deserialize, Serialize};

use mailwire_backend::BackendError;

/// One client-originated frame on the wire socket.
#[derive(Debug, Deserialize)]
pub struct WireRequest {
    pub id: Option<serde_json::Value>,
    pub method: String,
    pub params: Option<serde_json::Value>,
}

/// One server reply frame, correlated to its request by `id`.
#[derive(Debug, Serialize)]
pub struct WireResponse {
    pub id: Option<serde_json::Value>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WireErrorBody>,
}

#[derive(Debug, Serialize)]
pub struct WireErrorBody {
    pub code: String,
    pub message: String,
}

pub const PARSE_ERROR: &str = "PARSE_ERROR";
pub const METHOD_NOT_FOUND: &str = "METHOD_NOT_FOUND";

impl WireResponse {
    pub fn success(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Self {
            id,
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(
        id: Option<serde_json::Value>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id,
            success: false,
            result: None,
            error: Some(WireErrorBody {
                code: code.into(),
                message: message.into(),
            }),
        }
    }

    pub fn parse_error() -> Self {
        Self::error(None, PARSE_ERROR, "unparseable frame")
    }

    pub fn method_not_found(id: Option<serde_json::Value>, method: &str) -> Self {
        Self::error(id, METHOD_NOT_FOUND, format!("unknown method: {method}"))
    }

    pub fn from_backend(id: Option<serde_json::Value>, err: &BackendError) -> Self {
        Self::error(id, err.wire_code(), err.to_string())
    }
}

/// The closed set of operations a client may invoke over the wire.
/// Anything else is rejected with a structured `METHOD_NOT_FOUND` frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WireMethod {
    ListFolders,
    ListThreads,
    GetThread,
    SearchThreads,
    SendMail,
    ArchiveThread,
    MarkRead,
}

impl WireMethod {
    pub const ALL: [WireMethod; 7] = [
        Self::ListFolders,
        Self::ListThreads,
        Self::GetThread,
        Self::SearchThreads,
        Self::SendMail,
        Self::ArchiveThread,
        Self::MarkRead,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "list_folders" => Some(Self::ListFolders),
            "list_threads" => Some(Self::ListThreads),
            "get_thread" => Some(Self::GetThread),
            "search_threads" => Some(Self::SearchThreads),
            "send_mail" => Some(Self::SendMail),
            "archive_thread" => Some(Self::ArchiveThread),
            "mark_read" => Some(Self::MarkRead),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ListFolders => "list_folders",
            Self::ListThreads => "list_threads",
            Self::GetThread => "get_thread",
            Self::SearchThreads => "search_threads",
            Self::SendMail => "send_mail",
            Self::ArchiveThread => "archive_thread",
            Self::MarkRead => "mark_read",
        }
    }
}

impl std::fmt::Display for WireMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
