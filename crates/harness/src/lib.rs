pub mod network;
pub mod profile;
pub mod session;
pub mod store;

pub use network::{PushHub, TestNetwork};
pub use profile::profile_registry;
pub use session::{Recorder, TestSession};
pub use store::MemoryStore;
