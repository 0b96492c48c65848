/// Error reported by a database driver, kept intact so callers can downcast it.
pub type DriverError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error type for the sqlunit crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The base connection string looked like a URI but could not be parsed.
    #[error("invalid connection string: {0}")]
    InvalidConnectionString(#[source] url::ParseError),
    /// A configuration value (usually from the environment) was unusable.
    #[error("{0}")]
    Configuration(String),
    /// A required unit attribute was missing or blank.
    #[error("the `{0}` attribute is required")]
    MissingAttribute(&'static str),
    /// Opening the connection or the liveness probe failed.
    #[error("failed to connect to database '{database}': {source}")]
    Connectivity {
        database: String,
        #[source]
        source: DriverError,
    },
    /// A statement was rejected by the database. `index` is zero-based.
    #[error("statement {} failed: {source}", .index + 1)]
    Statement {
        index: usize,
        statement: String,
        #[source]
        source: DriverError,
    },
    /// The forward script was changed after the unit was materialized.
    #[error("changing the `up` attribute is not allowed after the resource has been created")]
    ImmutableForwardScript,
    #[error("operation was cancelled")]
    Cancelled,
    #[error("operation deadline exceeded")]
    DeadlineExceeded,
}

impl Error {
    /// Whether an orchestration layer could reasonably retry the whole transition.
    ///
    /// Nothing in this crate retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connectivity { .. } | Self::Cancelled | Self::DeadlineExceeded
        )
    }
}

impl From<url::ParseError> for Error {
    fn from(value: url::ParseError) -> Self {
        Self::InvalidConnectionString(value)
    }
}
