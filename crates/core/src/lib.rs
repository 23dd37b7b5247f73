pub mod attribute;
pub mod error;
pub mod ids;
pub mod key;
pub mod registry;
pub mod value;
pub mod version;

pub use attribute::{AttributeValue, Origin, SyncEvent};
pub use error::{CoreError, ValidationError};
pub use ids::*;
pub use key::AttributeKey;
pub use registry::{AttributeDescriptor, AttributeRegistry, Shape};
pub use value::Value;
pub use version::Version;
