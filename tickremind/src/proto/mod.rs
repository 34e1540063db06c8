pub mod http;
pub mod tick;

use failure::Fail;
use log::{debug, error};
pub use self::tick::{Dashboard, NewEntryResponse, NewRuleResponse, RuleListing, TickEntryValue, TickRule, UserSettings};
use serde::{Deserialize, Serialize};

/// Envelope of every error answered by the service.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response<E> {
    error: ErrorBody<E>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody<E> {
    #[serde(flatten)]
    error: E,
    message: String,
}

impl<E: std::fmt::Display> Response<E> {
    pub fn error(error: E) -> Self {
        let message = format!("{}", error);
        Response {
            error: ErrorBody { error, message },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Fail)]
#[serde(rename_all = "camelCase")]
#[serde(tag = "type")]
pub enum Error {
    #[fail(display = "user must log in")]
    Unauthorized,
    #[fail(display = "value of field {:?} is invalid. hint: {}", field, hint)]
    InvalidField { field: String, hint: String },
    #[fail(display = "csv line {}: {}", line, hint)]
    InvalidCsvRow { line: u64, hint: String },
    #[fail(display = "request body is over the {} byte limit", limit)]
    PayloadTooLarge { limit: usize },
    #[fail(display = "must be {} not {}", expected, method)]
    WrongMethod { expected: String, method: String },
    #[fail(display = "user {:?} already exists", identity)]
    UserExists { identity: String },
    #[fail(display = "no settings for {:?}, please create your user entry", identity)]
    SettingsNotFound { identity: String },
    #[fail(display = "rule {} not found", key)]
    RuleNotFound { key: String },
    #[fail(display = "storage error: {}", error)]
    Storage { error: String },
    #[fail(display = "serialization error: {}", error)]
    Serialization { error: String },
    #[fail(display = "template error: {}", error)]
    Template { error: String },
}

impl Error {
    pub fn invalid_field<F: Into<String>, H: Into<String>>(field: F, hint: H) -> Self {
        Error::InvalidField {
            field: field.into(),
            hint: hint.into(),
        }
    }
}

impl From<failure::Error> for Error {
    fn from(err: failure::Error) -> Self {
        match err.downcast::<Error>() {
            Ok(error) => error,
            Err(error) => {
                debug!("storage failure backtrace: {}", error.backtrace());
                Error::Storage {
                    error: format!("{}", error),
                }
            }
        }
    }
}

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        use self::Error::*;
        match self {
            Unauthorized => StatusCode::BAD_REQUEST,
            InvalidField { .. } => StatusCode::BAD_REQUEST,
            InvalidCsvRow { .. } => StatusCode::BAD_REQUEST,
            WrongMethod { .. } => StatusCode::BAD_REQUEST,
            PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            UserExists { .. } => StatusCode::CONFLICT,
            SettingsNotFound { .. } => StatusCode::NOT_FOUND,
            RuleNotFound { .. } => StatusCode::NOT_FOUND,
            Storage { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Serialization { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Template { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            error!("request failed: {}", self);
        } else {
            debug!("request rejected: {}", self);
        }
        HttpResponse::build(status).json(Response::error(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use failure::format_err;

    #[test]
    fn service_errors_survive_failure_round_trip() {
        let err: failure::Error = Error::UserExists {
            identity: "test@example.com".into(),
        }
        .into();

        assert_eq!(
            Error::from(err),
            Error::UserExists {
                identity: "test@example.com".into()
            }
        );
    }

    #[test]
    fn foreign_failures_become_storage_errors() {
        let err = Error::from(format_err!("disk is full"));
        assert_eq!(
            err,
            Error::Storage {
                error: "disk is full".into()
            }
        );
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn client_errors_map_to_400_class() {
        assert_eq!(Error::Unauthorized.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            Error::invalid_field("value", "not a number").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::UserExists { identity: "a".into() }.status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            Error::PayloadTooLarge { limit: 64 }.status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            Error::SettingsNotFound { identity: "a".into() }.status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn error_body_carries_type_tag_and_message() {
        let body = serde_json::to_value(Response::error(Error::RuleNotFound {
            key: "abc".into(),
        }))
        .unwrap();

        assert_eq!(body["error"]["type"], "ruleNotFound");
        assert_eq!(body["error"]["key"], "abc");
        assert_eq!(body["error"]["message"], "rule abc not found");
    }
}
