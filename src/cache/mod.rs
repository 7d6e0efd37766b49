//! Generational response cache for offline support.
//!
//! This module provides:
//! - A cache store holding one generation of response snapshots per deployment
//! - A network-first fetch interceptor that falls back to the cache offline
//! - A lifecycle manager that prefetches the app shell and purges old generations

mod interceptor;
mod lifecycle;
mod storage;
mod store;
mod types;

pub use interceptor::{FetchInterceptor, Intercepted, Scope};
pub use lifecycle::{InstallReport, LifecycleManager};
pub use storage::{CacheStorage, NoopStorage, SqliteStorage};
pub use store::{CacheHandle, CacheStore};
pub use types::{CacheKey, CachedResponse, GenerationState, ResponseSource, Served};
