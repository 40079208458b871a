use crate::container_name::DeriveError;
use reqwest::StatusCode;
use thiserror::Error;

/// The error type for every operation in this crate.
///
/// Validation variants are raised before any request is issued; the remaining
/// variants describe what went wrong talking to the webtask cluster.
#[derive(Debug, Error)]
pub enum Error {
    /// Both `nbf` and `exp` were given, and `exp` is not after `nbf`.
    #[error("The `nbf` parameter cannot be set to a later time than `exp`.")]
    InvalidScheduleWindow,

    #[error("Unsupported limit type `{limit}`. Supported limits are: {}.", .supported.join(", "))]
    UnsupportedLimitType {
        limit: String,
        supported: Vec<&'static str>,
    },

    #[error("Unsupported limit value for `{limit}` limit. All limits must be positive integers.")]
    UnsupportedLimitValue { limit: String },

    #[error("Missing required option: `options.{option}`")]
    MissingRequiredOption { option: &'static str },

    /// No job name was given, and none could be derived from the webtask.
    #[error("Cron jobs must have a name; no job name could be derived from the webtask")]
    MissingJobName,

    #[error("Unnamed webtasks cannot be removed")]
    UnremovableWebtask,

    /// Any other invalid combination of caller-supplied options.
    #[error("{0}")]
    Validation(String),

    /// The request never produced an HTTP response (DNS, connection, timeout, ..)
    #[error("Error communicating with the webtask cluster: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid request: {message}")]
    Client { status: StatusCode, message: String },

    #[error("Server error: {message}")]
    Server { status: StatusCode, message: String },

    /// A redirect (or other unexpected status) that the client does not follow.
    #[error("Unexpected response-type from webtask cluster: {status}")]
    UnexpectedResponseType {
        status: StatusCode,
        location: Option<String>,
    },

    /// The response was successful but its body could not be interpreted.
    #[error("Invalid response from webtask cluster: {0}")]
    InvalidResponse(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Unable to derive container name from `ten` claim `{claim}`: {source}.")]
    ContainerDerivation {
        claim: String,
        #[source]
        source: DeriveError,
    },

    /// The profile could not be configured
    #[error("{0}")]
    Config(String),
}

/// Result type for this crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// If this error was caused by an HTTP response, return its status code.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Error::Client { status, .. }
            | Error::Server { status, .. }
            | Error::UnexpectedResponseType { status, .. } => Some(*status),
            Error::Transport(err) => err.status(),
            _ => None,
        }
    }

    /// True if this error was raised while validating caller input, before
    /// anything was sent to the cluster.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::InvalidScheduleWindow
                | Error::UnsupportedLimitType { .. }
                | Error::UnsupportedLimitValue { .. }
                | Error::MissingRequiredOption { .. }
                | Error::MissingJobName
                | Error::UnremovableWebtask
                | Error::Validation(_)
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn limit_type_lists_supported() {
        let err = Error::UnsupportedLimitType {
            limit: "fortnight".into(),
            supported: vec!["second", "minute"],
        };
        assert_eq!(
            err.to_string(),
            "Unsupported limit type `fortnight`. Supported limits are: second, minute."
        );
        assert!(err.is_validation());
    }

    #[test]
    fn status_code_for_http_errors() {
        let err = Error::Client {
            status: StatusCode::CONFLICT,
            message: "etag mismatch".into(),
        };
        assert_eq!(err.status_code(), Some(StatusCode::CONFLICT));
        assert!(!err.is_validation());
        assert_eq!(err.to_string(), "Invalid request: etag mismatch");
    }

    #[test]
    fn no_status_for_validation() {
        assert_eq!(Error::MissingJobName.status_code(), None);
    }
}
