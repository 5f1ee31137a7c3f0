use std::fmt;

/// Errors raised while reading or applying a configuration file.
#[derive(Debug)]
pub enum ConfigError {
    InvalidValue(String, String),
    UnknownKey(String),
    UnknownSection(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidValue(key, value) => {
                write!(f, "invalid value '{}' for key '{}'", value, key)
            }
            ConfigError::UnknownKey(key) => write!(f, "unknown configuration key: '{}'", key),
            ConfigError::UnknownSection(section) => write!(f, "unknown section: '{}'", section),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Error taxonomy for the communications core.
///
/// The categories follow the error-handling design: transient network
/// errors are handled by the caller without reaching this enum at all
/// (retried or dropped in place), so everything that does become a
/// `CommError` is either fatal-to-the-session or fatal-to-the-process.
#[derive(Debug)]
pub enum CommError {
    /// I/O failure that isn't one of the recognized fatal-disconnect kinds.
    Io(std::io::Error),

    /// A fatal network error on a session socket: the session must be
    /// marked for close at the next pass boundary.
    SessionClosed,

    /// The ERQ co-process socket was lost or never started.
    ErqUnavailable(String),

    /// A session-table or buffer invariant was violated badly enough that
    /// the session must be force-closed.
    InvariantViolated(&'static str),

    /// Configuration file couldn't be parsed or applied.
    Configuration(String),
}

impl fmt::Display for CommError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommError::Io(err) => write!(f, "I/O error: {}", err),
            CommError::SessionClosed => write!(f, "session closed"),
            CommError::ErqUnavailable(msg) => write!(f, "ERQ unavailable: {}", msg),
            CommError::InvariantViolated(msg) => write!(f, "invariant violated: {}", msg),
            CommError::Configuration(msg) => write!(f, "configuration error: {}", msg),
        }
    }
}

impl std::error::Error for CommError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CommError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CommError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::TimedOut => CommError::SessionClosed,
            _ => CommError::Io(err),
        }
    }
}

impl From<ConfigError> for CommError {
    fn from(err: ConfigError) -> Self {
        CommError::Configuration(err.to_string())
    }
}

pub type CommResult<T> = Result<T, CommError>;

/// Classification of a socket error code encountered by the scheduler,
/// used to decide whether a session read/write failure is benign,
/// transient, or fatal (errors taxonomy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOutcome {
    /// Keep going; nothing happened (EWOULDBLOCK/EAGAIN/EINTR on accept).
    Benign,
    /// Retry a bounded number of times or drop the pending write.
    Transient,
    /// Close the session at the next pass boundary.
    Fatal,
}

/// Classify an `io::Error` from a session socket per the fatal/transient
/// taxonomy. Accept-path benign codes are handled separately by the caller
/// since `ErrorKind` doesn't distinguish `EPROTO`/`ECONNABORTED` cleanly
/// across platforms.
pub fn classify_session_io_error(err: &std::io::Error) -> IoOutcome {
    use std::io::ErrorKind;

    match err.kind() {
        ErrorKind::WouldBlock | ErrorKind::Interrupted => IoOutcome::Transient,
        ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe
        | ErrorKind::TimedOut
        | ErrorKind::NotConnected
        | ErrorKind::UnexpectedEof => IoOutcome::Fatal,
        _ => IoOutcome::Fatal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn io_error_maps_disconnect_kinds_to_session_closed() {
        let err: CommError = io::Error::from(io::ErrorKind::ConnectionReset).into();
        assert!(matches!(err, CommError::SessionClosed));
    }

    #[test]
    fn io_error_preserves_other_kinds() {
        let err: CommError = io::Error::from(io::ErrorKind::PermissionDenied).into();
        assert!(matches!(err, CommError::Io(_)));
    }

    #[test]
    fn config_error_wraps_into_comm_error() {
        let cfg = ConfigError::UnknownKey("bogus".to_string());
        let err: CommError = cfg.into();
        assert!(matches!(err, CommError::Configuration(_)));
    }

    #[test]
    fn classify_would_block_as_transient() {
        let err = io::Error::from(io::ErrorKind::WouldBlock);
        assert_eq!(classify_session_io_error(&err), IoOutcome::Transient);
    }

    #[test]
    fn classify_connection_reset_as_fatal() {
        let err = io::Error::from(io::ErrorKind::ConnectionReset);
        assert_eq!(classify_session_io_error(&err), IoOutcome::Fatal);
    }
}
