pub mod database;
pub mod error;
pub mod schema;
pub mod sessions;
pub mod users;

pub use database::Database;
pub use error::StoreError;
pub use sessions::{SessionRecord, SessionRepo};
pub use users::{UserRecord, UserRepo};
