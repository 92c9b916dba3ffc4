//! Merge buffer configuration.
//!
//! Durations are written in humanized form (`"0s"`, `"250ms"`, `"1m"`).
//!
//! ```rust
//! use std::time::Duration;
//! use seriesmerge::config::MergeConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MergeConfig::from_json(r#"{"hold_time": "250ms"}"#)?;
//! assert_eq!(config.hold_time, Duration::from_millis(250));
//! assert!(config.drop_original);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Example configuration, as shown to users of the aggregator.
///
/// `drop_original` drops the unmerged input records so only merged records
/// reach the outputs. `hold_time` is the minimum wall-clock time a point is
/// held waiting for more points to merge: a point arriving just before a
/// flush would otherwise miss a point arriving just after it. It is measured
/// on the wall clock, never on the metric's own timestamp.
pub const SAMPLE_CONFIG: &str = r#"{
  "drop_original": true,
  "hold_time": "0ms"
}"#;

/// Configuration for a [`MergeBuffer`](crate::merge::MergeBuffer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MergeConfig {
    /// Minimum quiet period before a merged record may be emitted. Default: 0.
    #[serde(default, with = "humantime_serde")]
    pub hold_time: Duration,

    /// Whether the host should drop the original, unmerged records.
    /// Default: true. Only the host acts on this.
    #[serde(default = "default_drop_original")]
    pub drop_original: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            hold_time: Duration::ZERO,
            drop_original: default_drop_original(),
        }
    }
}

fn default_drop_original() -> bool {
    true
}

impl MergeConfig {
    /// Creates a configuration with the given hold time.
    pub fn with_hold_time(hold_time: Duration) -> Self {
        Self {
            hold_time,
            ..Self::default()
        }
    }

    /// Decodes a configuration from a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the document is malformed, has
    /// unknown keys or holds an unparsable duration.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|source| ConfigError::Parse { source }.into())
    }
}

/// Parses a humanized duration such as `"500ms"` or `"1m 30s"`.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidDuration`] if the string is not a duration.
pub fn parse_duration(value: &str) -> Result<Duration> {
    humantime::parse_duration(value.trim()).map_err(|source| {
        ConfigError::InvalidDuration {
            value: value.to_string(),
            source,
        }
        .into()
    })
}
