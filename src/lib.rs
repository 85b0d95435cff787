//! Muninn - interaction recording and response caching for recommendation dashboards
//!
//! Two components sit between a web layer and an external recommendation
//! engine:
//!
//! - [`InteractionRecorder`]: de-duplicates user interactions, persists them
//!   and forwards each recorded event at most once to the engine.
//! - [`ResponseCache`]: caches upstream API responses by endpoint and
//!   parameters, with TTL expiry and a periodic maintenance sweep.
//!
//! Both talk to storage through the traits in [`store`] and never block the
//! caller on anything optional: forwarding and caching fail soft, only event
//! persistence failures reach the caller.
//!
//! # Recording Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use muninn::{
//!     EngineClient, Forwarder, InteractionRecorder, InteractionType, MemoryInteractionStore,
//!     NewInteraction,
//! };
//!
//! #[tokio::main]
//! async fn main() -> muninn::Result<()> {
//!     let engine = Arc::new(EngineClient::from_env()?);
//!     let recorder = InteractionRecorder::builder(
//!         Arc::new(MemoryInteractionStore::new()),
//!         Forwarder::inline(engine),
//!     )
//!     .build()?;
//!
//!     let result = recorder
//!         .record(NewInteraction::new("u1", "bitcoin", InteractionType::View))
//!         .await?;
//!     println!("recorded: {}, forwarded: {}", result.is_recorded(), result.forwarded());
//!     Ok(())
//! }
//! ```
//!
//! # Caching Example
//!
//! ```rust
//! use std::sync::Arc;
//! use muninn::{CacheConfig, MemoryCacheStore, ResponseCache};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let cache = ResponseCache::new(Arc::new(MemoryCacheStore::new()), CacheConfig::default());
//! let params = json!({"limit": 5}).as_object().cloned().unwrap();
//!
//! cache.store("trending", params.clone(), json!([{"id": "btc"}]), 60).await;
//! let hit = cache.lookup("trending", &params).await;
//! assert_eq!(hit.unwrap().response, json!([{"id": "btc"}]));
//! # }
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod forward;
pub mod recorder;
pub mod store;
pub mod telemetry;
pub mod types;

// Re-export main types at crate root
pub use cache::{CacheConfig, MaintenanceTask, MaintenanceTotals, ResponseCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{MuninnError, Result};
pub use forward::{
    DeliveryMode, EngineClient, ForwardPayload, ForwardQueue, Forwarder, InteractionSink,
    QueueConfig, RetryConfig,
};
pub use recorder::{DedupMode, InteractionRecorder, RecorderConfig};
pub use store::{CacheStore, InteractionStore, MemoryCacheStore, MemoryInteractionStore};

// Re-export all types
pub use types::{
    CacheEntry, CacheLookup, CacheStats, EndpointUsage, ForwardStatus, InteractionEvent,
    InteractionType, MaintenanceReport, NewInteraction, Parameters, RecordResult,
};
