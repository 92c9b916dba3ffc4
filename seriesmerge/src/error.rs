//! Error types for the seriesmerge grouping core.

use thiserror::Error;

/// The main error type for all seriesmerge operations.
///
/// Grouping, flushing and committing never fail; errors only come from
/// converting caller-supplied field values, parsing configuration values and
/// looking up aggregators in a [`Catalog`](crate::aggregator::Catalog).
#[derive(Error, Debug)]
pub enum MergeError {
    /// A field value could not be represented.
    #[error("field error: {0}")]
    Field(#[from] FieldError),

    /// A configuration value was invalid.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// An aggregator catalog operation failed.
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
}

/// Errors that can occur when converting a value into a field value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    /// The value has no field representation (null, array, non-finite float, ...).
    #[error("unsupported value type for field '{key}': {reason}")]
    UnsupportedValueType {
        /// The field key the value was destined for.
        key: String,
        /// What made the value unrepresentable.
        reason: String,
    },
}

/// Errors that can occur while interpreting configuration values.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A duration string could not be parsed.
    #[error("invalid duration '{value}': {source}")]
    InvalidDuration {
        /// The rejected input.
        value: String,
        /// The underlying parse error.
        #[source]
        source: humantime::DurationError,
    },

    /// The configuration document could not be decoded.
    #[error("failed to parse configuration: {source}")]
    Parse {
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised by the aggregator catalog.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// No aggregator is registered under the requested name.
    #[error("no aggregator registered as '{name}'")]
    UnknownAggregator {
        /// The requested name.
        name: String,
    },

    /// An aggregator is already registered under this name.
    #[error("aggregator '{name}' is already registered")]
    DuplicateAggregator {
        /// The conflicting name.
        name: String,
    },
}

/// Type alias for `Result<T, MergeError>`.
pub type Result<T> = std::result::Result<T, MergeError>;
