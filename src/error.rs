//! Gateway error taxonomy.
//!
//! Every failure the request pipeline can hit falls into one of five
//! categories. The category decides how the failure surfaces: upstream
//! errors become a `502 Bad Gateway: <reason>` answer, policy errors are
//! answered by the authorizer itself, internal errors close the connection
//! and capture errors are recorded but never fatal.

use std::fmt;

/// Coarse classification used for logging, metrics and response selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Input,
    Upstream,
    Policy,
    Internal,
    Capture,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Input => "input",
            ErrorKind::Upstream => "upstream",
            ErrorKind::Policy => "policy",
            ErrorKind::Internal => "internal",
            ErrorKind::Capture => "capture",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while serving a request.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("bad CONNECT target {0:?}")]
    BadConnectTarget(String),

    #[error("invalid upstream URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Transport(String),

    #[error("context canceled")]
    Canceled,

    #[error("authorization service unavailable: {0}")]
    PolicyUnavailable(String),

    #[error("authorization denied with status {0}")]
    PolicyDenied(u16),

    #[error("connection upgrade unsupported")]
    HijackUnsupported,

    #[error("certificate error: {0}")]
    Certificate(#[from] crate::certs::CertError),

    #[error("streaming copy panicked")]
    CopyPanicked,

    #[error("response body exceeded capture capacity")]
    CaptureOverflow,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// The taxonomy bucket this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::BadConnectTarget(_)
            | GatewayError::InvalidUrl { .. }
            | GatewayError::InvalidRequest(_) => ErrorKind::Input,
            GatewayError::Transport(_) | GatewayError::Canceled | GatewayError::Io(_) => {
                ErrorKind::Upstream
            }
            GatewayError::PolicyUnavailable(_) | GatewayError::PolicyDenied(_) => {
                ErrorKind::Policy
            }
            GatewayError::HijackUnsupported
            | GatewayError::Certificate(_)
            | GatewayError::CopyPanicked => ErrorKind::Internal,
            GatewayError::CaptureOverflow => ErrorKind::Capture,
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(GatewayError::BadConnectTarget("x".into()).kind(), ErrorKind::Input);
        assert_eq!(GatewayError::Transport("refused".into()).kind(), ErrorKind::Upstream);
        assert_eq!(GatewayError::Canceled.kind(), ErrorKind::Upstream);
        assert_eq!(GatewayError::PolicyDenied(401).kind(), ErrorKind::Policy);
        assert_eq!(GatewayError::HijackUnsupported.kind(), ErrorKind::Internal);
        assert_eq!(GatewayError::CaptureOverflow.kind(), ErrorKind::Capture);
    }

    #[test]
    fn transport_message_is_passed_through() {
        let err = GatewayError::Transport("connection refused".into());
        assert_eq!(err.to_string(), "connection refused");
    }
}
