//! Connection target and options.

use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 27017;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2500);

/// A `database.collection` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
  pub database: String,
  pub collection: String,
}

impl Target {
  /// Split on the first dot only. `"AAC.animals.archive"` targets the
  /// `animals.archive` collection of `AAC`.
  pub fn parse(target: &str) -> Self {
    let (database, collection) = target.split_once('.').unwrap_or((target, ""));
    Self {
      database: database.to_string(),
      collection: collection.to_string(),
    }
  }

  pub fn validate(&self) -> Result<()> {
    if self.database.is_empty() {
      return Err(Error::InvalidTarget(format!("no database name in '{}'", self)));
    }
    if self.collection.is_empty() {
      return Err(Error::InvalidTarget(format!("no collection name in '{}'", self)));
    }
    Ok(())
  }
}

impl Default for Target {
  fn default() -> Self {
    Self::parse("admin.system.users")
  }
}

impl fmt::Display for Target {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}.{}", self.database, self.collection)
  }
}

/// Connection options
#[derive(Clone)]
pub struct ConnectOptions {
  pub host: String,
  pub port: u16,
  pub username: Option<String>,
  pub password: Option<String>,
  pub timeout: Duration,
}

impl ConnectOptions {
  pub fn new() -> Self {
    Self {
      host: DEFAULT_HOST.to_string(),
      port: DEFAULT_PORT,
      username: None,
      password: None,
      timeout: DEFAULT_TIMEOUT,
    }
  }

  pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
    self.username = Some(username.into());
    self.password = Some(password.into());
    self
  }

  pub fn with_host(mut self, host: impl Into<String>, port: u16) -> Self {
    self.host = host.into();
    self.port = port;
    self
  }

  /// Applies to both server selection and connection establishment.
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn endpoint(&self) -> String {
    format!("{}:{}", self.host, self.port)
  }

  /// Connection string authenticating against the target's database.
  pub fn uri(&self, target: &Target) -> String {
    let credentials = match (&self.username, &self.password) {
      (Some(user), Some(pass)) => format!(
        "{}:{}@",
        urlencoding::encode(user),
        urlencoding::encode(pass)
      ),
      (Some(user), None) => format!("{}@", urlencoding::encode(user)),
      _ => String::new(),
    };
    let timeout_ms = self.timeout.as_millis();

    format!(
      "mongodb://{}{}/?authSource={}&serverSelectionTimeoutMS={}&connectTimeoutMS={}",
      credentials,
      self.endpoint(),
      urlencoding::encode(&target.database),
      timeout_ms,
      timeout_ms
    )
  }
}

impl Default for ConnectOptions {
  fn default() -> Self {
    Self::new()
  }
}

// Keeps the password out of logs.
impl fmt::Debug for ConnectOptions {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ConnectOptions")
      .field("host", &self.host)
      .field("port", &self.port)
      .field("username", &self.username)
      .field("password", &self.password.as_ref().map(|_| "***"))
      .field("timeout", &self.timeout)
      .finish()
  }
}
