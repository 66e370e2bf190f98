//! Access to the upstream game library reporting cumulative playtime.
//! [GameLibrary] is the seam the sampler works against; the production
//! implementation lives in [http::HttpGameLibrary].

pub mod http;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

/// Current cumulative playtime for one tracked title, as reported upstream.
/// Only ever used for diffing against the stored pointer, never persisted
/// verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitlePlaytime {
    pub id: Arc<str>,
    pub minutes: i64,
}

/// Contract for the upstream source of cumulative playtime counters.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GameLibrary: Send + Sync {
    /// Reads the current cumulative playtime of every tracked title.
    async fn playtimes(&self) -> Result<Vec<TitlePlaytime>>;
}
