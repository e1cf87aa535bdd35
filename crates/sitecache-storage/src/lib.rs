//! Site Cache Storage Layer
//!
//! This crate provides the cache store abstraction for sitecache: named,
//! versioned generations mapping requests to captured responses, with
//! local disk, in-memory and S3-compatible backends.

pub mod backend;
pub mod entry;
pub mod error;
pub mod local;
pub mod object;

pub use backend::{CacheStore, Generation, open_generation, validate_generation_name};
pub use entry::{CapturedResponse, RequestDescriptor};
pub use error::StorageError;
pub use local::LocalStorage;
pub use object::{ObjectStorage, S3Config};
