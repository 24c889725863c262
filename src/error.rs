use thiserror::Error;

/// Errors surfaced by the cache/session core.
#[derive(Debug, Error)]
pub enum Error {
  /// Login was rejected by the server, or the server was unreachable while
  /// logging in. The stored authorization token is left untouched.
  #[error("authentication failed: {0}")]
  Authentication(String),

  /// A job-list fetch failed at the transport or API layer. The cache keeps
  /// its last good contents.
  #[error("transport error: {0}")]
  Transport(String),

  /// The server configuration could not be turned into a usable endpoint.
  #[error("invalid configuration: {0}")]
  Config(String),

  /// An operation that needs a bound API client ran before `initialize`.
  #[error("server manager is not initialized")]
  NotInitialized,
}

pub type Result<T> = std::result::Result<T, Error>;
