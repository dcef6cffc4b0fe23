//! Error types for tsn-coreconf

use thiserror::Error;

/// Result type alias for tsn-coreconf operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building schema tables or translating
/// between YAML and Delta-SID CBOR
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed YANG module or SID file
    #[error("schema parse error in {file}: {reason}")]
    SchemaParse { file: String, reason: String },

    /// Schema cache was written by an incompatible version of this crate
    #[error("schema cache version {found} (expected {expected}); rebuilding")]
    CacheVersion { found: i64, expected: i64 },

    /// Malformed instance-identifier path
    #[error("malformed instance-identifier '{input}': {reason}")]
    InstanceIdParse { input: String, reason: String },

    /// No schema node matches the given path
    #[error("cannot resolve '{0}' to a SID")]
    PathUnresolved(String),

    /// Enumeration value not present in the name/value bijection
    #[error("'{value}' is not an enum member of {path}")]
    EnumUnknown { path: String, value: String },

    /// Unknown YANG identity
    #[error("unknown YANG identity: {0}")]
    IdentityUnknown(String),

    /// A CBOR map key resolves neither as a Delta-SID under its parent
    /// nor as an absolute SID
    #[error("CBOR key {key} does not resolve under parent SID {parent}")]
    DeltaResolve { key: i64, parent: u64 },

    /// Value cannot be encoded or decoded under its declared type
    #[error("cannot represent {value} as {expected} at {path}")]
    ValueType {
        path: String,
        expected: String,
        value: String,
    },

    /// Malformed CBOR payload
    #[error("CBOR error: {0}")]
    Cbor(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error (SID files, schema cache)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Build a `SchemaParse` error for the given source file
    pub fn schema(file: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::SchemaParse {
            file: file.into(),
            reason: reason.into(),
        }
    }

    /// Build an `InstanceIdParse` error for the given input
    pub fn instance_id(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InstanceIdParse {
            input: input.into(),
            reason: reason.into(),
        }
    }
}
