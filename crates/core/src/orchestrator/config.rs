//! Orchestrator configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the batch orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum units converting at the same time, across all jobs.
    #[serde(default = "default_max_parallel_units")]
    pub max_parallel_units: usize,

    /// File extensions (without the dot) accepted as convertible.
    /// Matched case-insensitively.
    #[serde(default = "default_accepted_extensions")]
    pub accepted_extensions: Vec<String>,

    /// File name prefixes marking transient artifacts, such as office lock
    /// files (`~$report.docx`). Matched against the entry's base name.
    #[serde(default = "default_ignored_prefixes")]
    pub ignored_prefixes: Vec<String>,

    /// Resume jobs interrupted by a restart when the orchestrator starts.
    #[serde(default = "default_recover_on_start")]
    pub recover_on_start: bool,
}

fn default_max_parallel_units() -> usize {
    num_cpus::get().max(1)
}

fn default_accepted_extensions() -> Vec<String> {
    vec!["docx".to_string()]
}

fn default_ignored_prefixes() -> Vec<String> {
    vec!["~$".to_string()]
}

fn default_recover_on_start() -> bool {
    true
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_parallel_units: default_max_parallel_units(),
            accepted_extensions: default_accepted_extensions(),
            ignored_prefixes: default_ignored_prefixes(),
            recover_on_start: default_recover_on_start(),
        }
    }
}

impl OrchestratorConfig {
    pub fn with_max_parallel_units(mut self, max: usize) -> Self {
        self.max_parallel_units = max;
        self
    }

    pub fn with_recover_on_start(mut self, recover: bool) -> Self {
        self.recover_on_start = recover;
        self
    }
}
