use serde::{Serialize, Serializer};

/// Result type alias for facade operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Structured error response for API consumers.
#[derive(Serialize)]
struct ErrorResponse {
   code: String,
   message: String,
}

/// Error types for the scoped Postgres facade.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// Error from the connection manager (pool, connection or statement).
   #[error(transparent)]
   ConnectionManager(#[from] sqlx_pg_conn_mgr::Error),

   /// Failure raised by caller code inside a scope.
   #[error("{0}")]
   Other(String),
}

impl Error {
   /// Extract a structured error code from the error type.
   pub fn error_code(&self) -> String {
      match self {
         Error::ConnectionManager(e) => e.error_code(),
         Error::Other(_) => "OTHER_ERROR".to_string(),
      }
   }

   /// Returns true if the database rejected a statement.
   pub fn is_statement_error(&self) -> bool {
      matches!(self, Error::ConnectionManager(e) if e.is_statement_error())
   }
}

impl Serialize for Error {
   fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
   where
      S: Serializer,
   {
      let response = ErrorResponse {
         code: self.error_code(),
         message: self.to_string(),
      };
      response.serialize(serializer)
   }
}

#[cfg(test)]
mod tests {
   use serde_json::json;

   use super::*;

   #[test]
   fn test_serializes_code_and_message() {
      let err = Error::from(sqlx_pg_conn_mgr::Error::PoolClosed);
      assert_eq!(
         serde_json::to_value(&err).unwrap(),
         json!({
            "code": "POOL_CLOSED",
            "message": "connection pool has been closed",
         })
      );
   }

   #[test]
   fn test_statement_error_passes_through() {
      let err = Error::from(sqlx_pg_conn_mgr::Error::Statement(sqlx::Error::RowNotFound));
      assert!(err.is_statement_error());
      assert_eq!(err.error_code(), "STATEMENT_ERROR");

      let err = Error::Other("boom".into());
      assert!(!err.is_statement_error());
      assert_eq!(err.to_string(), "boom");
   }
}
