pub mod database;
pub mod error;
pub mod local_storage;
pub mod schema;

pub use database::Database;
pub use error::StoreError;
pub use local_storage::LocalStorage;
