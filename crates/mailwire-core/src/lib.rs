pub mod identity;
pub mod ids;

pub use identity::{validate_email, Identity};
pub use ids::{ConnectionId, UserId};
