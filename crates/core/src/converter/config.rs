//! Configuration for the converter module.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the LibreOffice-based converter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterConfig {
    /// Path to the office binary.
    #[serde(default = "default_binary")]
    pub binary: PathBuf,

    /// Arguments placed before the conversion arguments, for wrappers such
    /// as `flatpak run org.libreoffice.LibreOffice`.
    #[serde(default)]
    pub launcher_args: Vec<String>,

    /// Additional arguments placed after the profile flag.
    #[serde(default)]
    pub extra_args: Vec<String>,

    /// Output format passed to `--convert-to`; also the output extension.
    #[serde(default = "default_target_format")]
    pub target_format: String,

    /// Timeout for a single unit in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Value for `HOME` in the converter environment.
    /// Defaults to the unit's own profile directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_dir: Option<PathBuf>,
}

fn default_binary() -> PathBuf {
    PathBuf::from("libreoffice")
}

fn default_target_format() -> String {
    "pdf".to_string()
}

fn default_timeout() -> u64 {
    120
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            launcher_args: Vec::new(),
            extra_args: Vec::new(),
            target_format: default_target_format(),
            timeout_secs: default_timeout(),
            home_dir: None,
        }
    }
}

impl ConverterConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_launcher_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.launcher_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}
