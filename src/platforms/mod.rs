//! Platform adapters.
//!
//! One adapter per execution platform, each translating the platform's
//! native instance/task/job listing into canonical [`Agent`] records. The
//! reconciler only sees the [`PlatformAdapter`] trait; dispatch goes through
//! the concrete adapters so each platform's submission path stays a pattern
//! match rather than a string comparison.

use async_trait::async_trait;

use crate::agent::Agent;
use crate::error::Result;

pub mod batch;
pub mod container;
pub mod simulator;
pub mod virtual_machine;

pub use batch::BatchJobAdapter;
pub use container::ContainerTaskAdapter;
pub use simulator::LocalSimulator;
pub use virtual_machine::VirtualMachineAdapter;

/// Discovery interface implemented by every platform adapter.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// Platform label used in logs and adapter-failure reports.
    fn platform(&self) -> &'static str;

    /// Whether credentials are configured for this platform. Drives the
    /// demo-fallback decision; an unconfigured adapter discovers nothing
    /// rather than failing.
    fn credentials_configured(&self) -> bool;

    /// List the agents currently visible on this platform.
    async fn discover(&self) -> Result<Vec<Agent>>;
}

pub(crate) fn authorize(
    request: reqwest::RequestBuilder,
    token: &Option<String>,
) -> reqwest::RequestBuilder {
    match token {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}
