use thiserror::Error;

/// Reasons a benchmark configuration is rejected before any work is done for it.
///
/// A rejected configuration is local to one point of a parameter sweep: the harness reports it
/// as skipped and moves on to the next one.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// The baseline storage for this configuration would need more key bytes than allowed.
    #[error("test is too big: {string_len} byte keys x {table_size} entries exceeds {limit} bytes")]
    TooBig {
        /// Length of every generated key, in bytes.
        string_len: usize,
        /// Number of entries the table would be seeded with.
        table_size: usize,
        /// The memory ceiling that was exceeded.
        limit: usize,
    },

    /// A table with no entries gives the workload nothing to draw random lookups from.
    #[error("table size must be at least one entry")]
    EmptyTable,

    /// An index buffer must be able to hold at least one index.
    #[error("index buffer capacity must be non-zero")]
    ZeroCapacity,

    /// An environment variable meant to tune the sweep did not hold a usable number.
    #[error("environment variable {var} has invalid value '{value}'")]
    InvalidEnv {
        /// Name of the offending variable.
        var: &'static str,
        /// The value it held.
        value: String,
    },
}

pub(crate) type Result<T> = std::result::Result<T, ConfigError>;
