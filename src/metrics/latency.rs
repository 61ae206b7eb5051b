//! Scoped latency timers
//!
//! A [`ScopedLatency`] records the time between its construction and its stop
//! into a latency histogram. Dropping an unstopped timer stops it, so exactly
//! one sample is recorded whichever way the measured scope is left.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

use super::instrument::{Attributes, Context, Histogram};
use super::registry::Registry;

/// Predefined latency histogram categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LatencyCategory {
    /// Game/server method calls
    Method,
    /// Script callbacks
    Script,
    /// Database queries
    Query,
    /// Scheduled tasks
    Task,
    /// Lock acquisition
    Lock,
}

struct CategoryEntry {
    label: &'static str,
    histogram: &'static str,
    scope_key: &'static str,
    description: &'static str,
}

// Indexed by `LatencyCategory as usize`
const CATEGORY_TABLE: [CategoryEntry; 5] = [
    CategoryEntry {
        label: "method",
        histogram: "method_latency",
        scope_key: "method",
        description: "Method execution latency in microseconds",
    },
    CategoryEntry {
        label: "script",
        histogram: "lua_latency",
        scope_key: "scope",
        description: "Script execution latency in microseconds",
    },
    CategoryEntry {
        label: "query",
        histogram: "query_latency",
        scope_key: "truncated_query",
        description: "Query latency in microseconds",
    },
    CategoryEntry {
        label: "task",
        histogram: "task_latency",
        scope_key: "task",
        description: "Task execution latency in microseconds",
    },
    CategoryEntry {
        label: "lock",
        histogram: "lock_latency",
        scope_key: "scope",
        description: "Lock wait latency in microseconds",
    },
];

impl LatencyCategory {
    pub const ALL: [LatencyCategory; 5] = [
        LatencyCategory::Method,
        LatencyCategory::Script,
        LatencyCategory::Query,
        LatencyCategory::Task,
        LatencyCategory::Lock,
    ];

    fn entry(self) -> &'static CategoryEntry {
        &CATEGORY_TABLE[self as usize]
    }

    /// Name of the histogram this category records into
    pub fn histogram_name(self) -> &'static str {
        self.entry().histogram
    }

    /// Attribute key the call-site name is stored under
    pub fn scope_key(self) -> &'static str {
        self.entry().scope_key
    }

    pub fn description(self) -> &'static str {
        self.entry().description
    }

    /// Look up a category by its histogram name
    pub fn from_histogram_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.histogram_name() == name)
    }
}

impl fmt::Display for LatencyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.entry().label)
    }
}

/// Category name outside the predefined set
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown latency category: {0}")]
pub struct UnknownCategory(pub String);

impl FromStr for LatencyCategory {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "method" => Ok(Self::Method),
            "script" | "lua" => Ok(Self::Script),
            "query" => Ok(Self::Query),
            "task" => Ok(Self::Task),
            "lock" => Ok(Self::Lock),
            other => Err(UnknownCategory(other.to_string())),
        }
    }
}

/// Timer recording its lifetime into a latency histogram exactly once
pub struct ScopedLatency<'r> {
    registry: &'r Registry,
    histogram: Option<Arc<dyn Histogram>>,
    attrs: Attributes,
    context: Context,
    begin: Instant,
    stopped: bool,
}

impl<'r> ScopedLatency<'r> {
    /// Start a timer for `name` on one of the predefined histograms.
    ///
    /// `name` is stored under `scope_key` in the sample's attributes.
    /// `histogram_name` must be one of the category histograms; anything
    /// else is a programming error caught in debug builds.
    pub fn new(registry: &'r Registry, name: &str, histogram_name: &str, scope_key: &str) -> Self {
        debug_assert!(
            LatencyCategory::from_histogram_name(histogram_name).is_some(),
            "unknown latency histogram: {histogram_name}"
        );

        let histogram = registry.latency_histogram(histogram_name);
        if histogram.is_none() && registry.is_recording() {
            debug!(histogram = histogram_name, "Latency histogram not registered, sample will be dropped");
        }

        let mut attrs = Attributes::new();
        attrs.insert(scope_key.to_string(), name.to_string());

        Self::with_histogram(registry, histogram, attrs, registry.default_context())
    }

    /// Start a timer for `name` in `category`
    pub fn for_category(registry: &'r Registry, category: LatencyCategory, name: &str) -> Self {
        Self::new(registry, name, category.histogram_name(), category.scope_key())
    }

    /// Start a timer on an explicit histogram
    pub fn with_histogram(
        registry: &'r Registry,
        histogram: Option<Arc<dyn Histogram>>,
        attrs: Attributes,
        context: Context,
    ) -> Self {
        Self {
            registry,
            histogram,
            attrs,
            context,
            begin: Instant::now(),
            stopped: false,
        }
    }

    /// Record the elapsed time. Only the first call has an effect.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        let elapsed = self.begin.elapsed().as_secs_f64() * 1_000_000.0;

        // Shut down registries drop samples from timers started earlier
        if !self.registry.is_recording() {
            return;
        }
        if let Some(histogram) = &self.histogram {
            histogram.record(elapsed, &self.attrs, &self.context);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Time since the timer started
    pub fn elapsed(&self) -> Duration {
        self.begin.elapsed()
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attrs
    }
}

impl Drop for ScopedLatency<'_> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Short label from a function signature.
///
/// Drops the parameter list opened by the last unmatched `(` and everything
/// up to the last space before it:
/// `"void Game::playerMove(uint32_t id) const"` becomes `"Game::playerMove"`.
pub fn method_name(signature: &str) -> &str {
    let head = &signature[..parameter_list_start(signature)];
    let start = head.rfind(' ').map_or(0, |space| space + 1);
    &head[start..]
}

/// Byte offset of the `(` opening the trailing parameter list
fn parameter_list_start(signature: &str) -> usize {
    let mut depth = 0usize;
    for (idx, ch) in signature.char_indices().rev() {
        match ch {
            ')' => depth += 1,
            '(' if depth <= 1 => return idx,
            '(' => depth -= 1,
            _ => {}
        }
    }
    signature.len()
}
