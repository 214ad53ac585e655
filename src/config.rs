//! Runtime configuration

use serde::{Deserialize, Serialize};

use crate::gc::{DEFAULT_EXTRA_MEMORY_THRESHOLD, DEFAULT_GC_THRESHOLD};

/// Nesting ceiling of the parser, the reviver walk and the stringifier
pub const DEFAULT_MAX_DEPTH: usize = 40_000;

/// Tunables of a [`Runtime`](crate::Runtime).
///
/// Deserializable so the CLI can load it from a JSON file; every field has a
/// default, so a partial file is fine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Net allocations between collections (0 disables automatic collection)
    pub gc_threshold: usize,
    /// Bytes of reported extra memory between collections (0 disables)
    pub extra_memory_threshold: usize,
    /// Deepest container nesting `JSON.parse` accepts
    pub max_parse_depth: usize,
    /// Deepest container nesting the reviver walk accepts
    pub max_reviver_depth: usize,
    /// Deepest container nesting the stringifier accepts
    pub max_stringify_depth: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            gc_threshold: DEFAULT_GC_THRESHOLD,
            extra_memory_threshold: DEFAULT_EXTRA_MEMORY_THRESHOLD,
            max_parse_depth: DEFAULT_MAX_DEPTH,
            max_reviver_depth: DEFAULT_MAX_DEPTH,
            max_stringify_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overlaid with `GC_THRESHOLD` and `JSCELL_MAX_DEPTH`
    pub fn from_env() -> Self {
        Self::default().overlay(|name| std::env::var(name).ok())
    }

    fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(threshold) = lookup("GC_THRESHOLD").and_then(|v| v.parse().ok()) {
            self.gc_threshold = threshold;
        }
        if let Some(depth) = lookup("JSCELL_MAX_DEPTH").and_then(|v| v.parse().ok()) {
            self.max_parse_depth = depth;
            self.max_reviver_depth = depth;
            self.max_stringify_depth = depth;
        }
        self
    }

    pub fn with_gc_threshold(mut self, threshold: usize) -> Self {
        self.gc_threshold = threshold;
        self
    }

    pub fn with_extra_memory_threshold(mut self, bytes: usize) -> Self {
        self.extra_memory_threshold = bytes;
        self
    }

    pub fn with_max_parse_depth(mut self, depth: usize) -> Self {
        self.max_parse_depth = depth;
        self
    }

    pub fn with_max_reviver_depth(mut self, depth: usize) -> Self {
        self.max_reviver_depth = depth;
        self
    }

    pub fn with_max_stringify_depth(mut self, depth: usize) -> Self {
        self.max_stringify_depth = depth;
        self
    }
}
