//! Periodic collectors for derived agent fields.
//!
//! Both collectors run on their own timers and only mutate derived fields
//! on existing registry entries; neither creates nor removes agents. A
//! failed tick is logged and the next tick retries naturally.

pub mod cost;
pub mod metrics;

pub use cost::CostCollector;
pub use metrics::MetricsCollector;
