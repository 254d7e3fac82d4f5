use thiserror::Error;

/// Classified failure from the analytics warehouse.
///
/// Callers at the HTTP boundary treat every variant the same way (a 500 carrying the raw
/// description), but the classification is kept so logs and the error body can say which
/// collaborator failed and how.
#[derive(Error, Debug)]
pub enum WarehouseError {
    /// Could not reach the warehouse, or the connection broke mid-statement
    #[error("{0}")]
    Unavailable(String),

    /// The warehouse rejected the statement (syntax, unknown relation, type mismatch, ...)
    #[error("{message}")]
    QueryMalformed { message: String, code: Option<String> },

    /// A returned column could not be read or coerced into the row shape
    #[error("{0}")]
    Decode(String),
}

impl WarehouseError {
    /// Stable, machine-readable name of the failure kind
    pub fn kind(&self) -> &'static str {
        match self {
            WarehouseError::Unavailable(_) => "warehouse_unavailable",
            WarehouseError::QueryMalformed { .. } => "query_malformed",
            WarehouseError::Decode(_) => "decode_failed",
        }
    }
}

/// Convert from sqlx::Error, separating "the server said no" from "we never got an answer"
impl From<sqlx::Error> for WarehouseError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => WarehouseError::QueryMalformed {
                message: db_err.message().to_string(),
                code: db_err.code().map(|c| c.to_string()),
            },
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::ColumnNotFound(_) | sqlx::Error::ColumnIndexOutOfBounds { .. } => {
                WarehouseError::Decode(err.to_string())
            }
            sqlx::Error::Decode(_) | sqlx::Error::TypeNotFound { .. } => WarehouseError::Decode(err.to_string()),
            // Io, Tls, Protocol, PoolTimedOut, Configuration, ... are all "could not talk to it"
            _ => WarehouseError::Unavailable(err.to_string()),
        }
    }
}

/// Type alias for warehouse operation results
pub type Result<T> = std::result::Result<T, WarehouseError>;
