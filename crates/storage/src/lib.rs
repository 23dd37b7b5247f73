pub mod error;
pub mod schema;
pub mod sqlite;
pub mod traits;

pub use error::{StorageError, StoreError};
pub use sqlite::SqliteCache;
pub use traits::*;
