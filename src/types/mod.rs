//! Public types for the Muninn API.

mod cache;
mod interaction;

pub use cache::{
    CacheEntry, CacheLookup, CacheStats, EndpointUsage, MaintenanceReport, Parameters, StageError,
};
pub use interaction::{
    ForwardStatus, InteractionEvent, InteractionType, NewInteraction, RecordResult,
};
