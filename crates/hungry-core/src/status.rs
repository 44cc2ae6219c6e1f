//! Tag enums carried by every domain response.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Food delivery platform a response belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    #[default]
    UberEats,
}

/// Where the content of a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    /// The restaurant search worker (pre-compiled database).
    FastDatabase,
    /// The ordering worker driving a browser.
    BrowserAutomation,
    /// Static content produced locally because the worker path was unavailable.
    StaticFallback,
}

impl ResponseSource {
    /// Returns true if the content was produced by a live worker.
    pub fn is_worker_backed(&self) -> bool {
        !matches!(self, Self::StaticFallback)
    }
}

impl fmt::Display for ResponseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::FastDatabase => "fast_database",
            Self::BrowserAutomation => "browser_automation",
            Self::StaticFallback => "static_fallback",
        };
        f.write_str(s)
    }
}

/// Outcome tag of the operation that produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    SearchCompleted,
    DetailsRetrieved,
    TopRatedRetrieved,
    AreaSearchCompleted,
    /// A long-running menu search was started on the ordering worker.
    SearchStarted,
    ResultsReady,
    OrderStarted,
    MultiOrderStarted,
    HealthChecked,
    /// Several background menu searches were started at once.
    BatchCreated,
    BatchStatusRetrieved,
    BatchCancelled,
}
