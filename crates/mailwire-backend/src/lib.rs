pub mod client;
pub mod error;
pub mod mock;

pub use client::{HttpMailBackend, MailBackend};
pub use error::BackendError;
pub use mock::{MockMailBackend, MockReply};
