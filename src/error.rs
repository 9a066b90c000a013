//! Error types for the CRUD client.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
  #[error("Connection failure: {0}")]
  ConnectionFailure(String),

  #[error("Invalid operation: {0}")]
  InvalidOperation(String),

  #[error("Write error: {0}")]
  WriteError(String),

  #[error("Invalid target: {0}")]
  InvalidTarget(String),

  #[error("Store error: {0}")]
  Store(String),
}

impl Error {
  /// Misuse conditions that propagate out of CRUD operations.
  ///
  /// Everything else originates in the store and is swallowed at the
  /// operation boundary.
  pub fn is_precondition(&self) -> bool {
    matches!(
      self,
      Self::ConnectionFailure(_) | Self::InvalidOperation(_) | Self::WriteError(_)
    )
  }
}

impl From<mongodb::error::Error> for Error {
  fn from(e: mongodb::error::Error) -> Self {
    Self::Store(e.to_string())
  }
}

pub type Result<T> = std::result::Result<T, Error>;
