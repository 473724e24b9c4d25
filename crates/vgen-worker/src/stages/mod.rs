//! Pipeline stages.
//!
//! Each stage is a single-attempt transformation; retry policy lives in
//! the orchestrator. Stages that fan out (voice lines, material windows)
//! re-sort their results by index before returning.

pub mod assembly;
pub mod keywords;
pub mod material;
pub mod metadata;
pub mod script;
pub mod voice;

use std::future::Future;
use std::time::Duration;

use vgen_providers::{ProviderError, ProviderResult};

pub use assembly::{build_plan, wrap_text};
pub use keywords::{KeywordExtractor, StopwordExtractor};
pub use material::{
    estimate_timeline_ms, plan_windows, rank_candidates, resolve_material, retime_clips,
    WindowPlan,
};
pub use metadata::{derive_metadata, parse_metadata};
pub use script::{
    generate_from_text, generate_script, parse_script, resolve_seed, StyleCatalog, StyleTemplate,
    VideoLength,
};
pub use voice::synthesize;

/// Run a provider call under a deadline; expiry becomes a transient timeout.
pub(crate) async fn with_deadline<T, F>(
    provider: &str,
    deadline: Duration,
    call: F,
) -> ProviderResult<T>
where
    F: Future<Output = ProviderResult<T>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::timeout(provider, deadline)),
    }
}
