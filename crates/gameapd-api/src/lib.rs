//! # gameapd-api
//!
//! Everything that talks to the control-plane API: the transport client,
//! the daemon-task repository, the cached server repository with its
//! dirty-field-preserving merge, and the generic request coalescer that
//! turns bursty server saves into bulk uploads.

pub mod client;
pub mod limiter;
pub mod servers;
pub mod tasks;

pub use client::{ApiClient, ApiRequest, ApiResponse, HttpApiClient};
pub use limiter::{CallScheduler, Flush};
pub use servers::CachedServerRepository;
pub use tasks::ApiGDTaskRepository;
