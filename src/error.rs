use std::error::Error as StdError;
use std::fmt;

pub type Result<T> = std::result::Result<T, CoreError>;

/// Configuration-layer errors: malformed config files, resolver URLs, or
/// bind addresses. Wrapped by `CoreError::Config`.
#[derive(Debug, Clone)]
pub enum ConfigError {
    InvalidBindAddress(String),
    InvalidResolverUrl(String),
    InvalidScheme(String),
    MissingVerifyOrIp(String),
    ParseError(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidBindAddress(addr) => write!(f, "invalid bind address: {addr}"),
            ConfigError::InvalidResolverUrl(url) => write!(f, "invalid resolver url: {url}"),
            ConfigError::InvalidScheme(scheme) => {
                write!(f, "unsupported resolver scheme: {scheme}")
            }
            ConfigError::MissingVerifyOrIp(url) => {
                write!(
                    f,
                    "dot/doh resolver needs either verify= or a literal ip host: {url}"
                )
            }
            ConfigError::ParseError(msg) => write!(f, "config parse error: {msg}"),
        }
    }
}

impl StdError for ConfigError {}

/// Exhaustive error taxonomy at the core boundary.
#[derive(Debug, Clone)]
pub enum CoreError {
    /// Malformed input (bad FQDN, multi-question packet, wrong class, ...).
    Invalid(String),
    /// NXDOMAIN, or a row absent from a table the caller expected.
    NotFound,
    /// Blocked by policy, or by upstream block-detection heuristics.
    Blocked,
    /// Blocked specifically because an upstream resolver appears to be
    /// censoring/filtering the answer itself.
    BlockedUpstream { resolver_name: String },
    /// The operation exceeded its deadline.
    Timeout,
    /// The device is offline and no usable backup answer exists.
    Offline,
    /// Any other transport or internal failure.
    Failure(String),
    /// This resolver has no answer; the caller should try the next one.
    Continue,
    /// The core is shutting down; abort and unwind cleanly.
    ShuttingDown,
    /// Every resolver eligible for this query was filtered out by scope
    /// rules or failure state.
    NoCompliance,
    /// FlowLookup exhausted its retry budget without attributing a PID.
    ConnectionNotFound,
    /// Configuration could not be parsed or validated.
    Config(ConfigError),
    /// Wrapped I/O error, with enough context to log usefully.
    Io(String),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::Invalid(msg) => write!(f, "invalid input: {msg}"),
            CoreError::NotFound => write!(f, "not found"),
            CoreError::Blocked => write!(f, "blocked"),
            CoreError::BlockedUpstream { resolver_name } => {
                write!(f, "blocked upstream by resolver {resolver_name}")
            }
            CoreError::Timeout => write!(f, "operation timed out"),
            CoreError::Offline => write!(f, "device is offline"),
            CoreError::Failure(msg) => write!(f, "failure: {msg}"),
            CoreError::Continue => write!(f, "no answer from this resolver, continue"),
            CoreError::ShuttingDown => write!(f, "shutting down"),
            CoreError::NoCompliance => write!(f, "no eligible resolver remained after filtering"),
            CoreError::ConnectionNotFound => write!(f, "connection not found"),
            CoreError::Config(e) => write!(f, "configuration error: {e}"),
            CoreError::Io(msg) => write!(f, "io error: {msg}"),
        }
    }
}

impl StdError for CoreError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            CoreError::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Io(err.to_string())
    }
}

impl From<ConfigError> for CoreError {
    fn from(err: ConfigError) -> Self {
        CoreError::Config(err)
    }
}

impl CoreError {
    /// True for the two error kinds FlowLookup is allowed to swallow on the
    /// way back to the packet-intercept driver.
    pub fn is_soft(&self) -> bool {
        matches!(self, CoreError::NotFound | CoreError::Continue)
    }
}
