//! Site Cache Core Logic
//!
//! This crate provides the worker configuration, the fetch router that
//! decides between network-first and stale-while-revalidate, the lifecycle
//! manager that installs and activates cache generations, and the site
//! functions (chat, waitlist).

pub mod config;
pub mod error;
pub mod functions;
pub mod lifecycle;
pub mod router;

#[cfg(test)]
mod testing;

pub use config::{
    CacheVersion, DEFAULT_API_PREFIX, DEFAULT_CACHE_VERSION, DEFAULT_PRECACHE, PrecacheManifest,
    WorkerConfig,
};
pub use error::CoreError;
pub use functions::{ChatService, FALLBACK_REPLY, Signup, WaitlistService};
pub use lifecycle::{
    ActivationReport, DeletionFailure, LifecycleManager, LifecycleStatus, Worker, WorkerState,
};
pub use router::{Exclusion, FetchRouter, RequestClass, ResponseSource, Routed, classify};
