pub mod backend;
pub mod blob;
pub mod bootstrap;
pub mod error;
pub mod mongo;
pub mod open;
pub mod path;
pub mod store;
pub mod types;

pub use error::{FsError, FsErrorKind, FsResult};
pub use store::FsStore;
