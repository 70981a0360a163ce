use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoirError {
    NotFound { entity: String, id: String },
    AlreadyExists { entity: String, id: String },
    InUse { entity: String, id: String },
    InsufficientStock { item: String, available: i64, requested: i64 },
    InvalidDate(String),
    InvalidArgument(String),
    Unauthorized,
    NotLoggedIn,
    Forbidden(String),
    SetupComplete,
    Internal(String),
}

impl StoirError {
    pub fn not_found(entity: &str, id: impl Into<String>) -> Self {
        StoirError::NotFound {
            entity: entity.to_string(),
            id: id.into(),
        }
    }

    pub fn already_exists(entity: &str, id: impl Into<String>) -> Self {
        StoirError::AlreadyExists {
            entity: entity.to_string(),
            id: id.into(),
        }
    }

    pub fn in_use(entity: &str, id: impl Into<String>) -> Self {
        StoirError::InUse {
            entity: entity.to_string(),
            id: id.into(),
        }
    }
}

impl fmt::Display for StoirError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoirError::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            StoirError::AlreadyExists { entity, id } => write!(f, "{entity} already exists: {id}"),
            StoirError::InUse { entity, id } => {
                write!(f, "{entity} {id} is still referenced and cannot be deleted")
            }
            StoirError::InsufficientStock {
                item,
                available,
                requested,
            } => write!(
                f,
                "insufficient stock for {item}: available {available}, requested {requested}"
            ),
            StoirError::InvalidDate(raw) => {
                write!(f, "invalid date {raw:?}: expected YYYY-MM-DD")
            }
            StoirError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            StoirError::Unauthorized => write!(f, "invalid username or password"),
            StoirError::NotLoggedIn => write!(f, "not logged in or session expired"),
            StoirError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            StoirError::SetupComplete => write!(f, "owner account already set up"),
            StoirError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for StoirError {}

impl StoirError {
    pub fn code(&self) -> Option<&'static str> {
        match self {
            StoirError::NotFound { .. } => Some("not_found"),
            StoirError::AlreadyExists { .. } => Some("already_exists"),
            StoirError::InUse { .. } => Some("in_use"),
            StoirError::InsufficientStock { .. } => Some("insufficient_stock"),
            StoirError::InvalidDate(_) => Some("invalid_date"),
            StoirError::InvalidArgument(_) => Some("invalid_argument"),
            StoirError::Unauthorized => Some("unauthorized"),
            StoirError::NotLoggedIn => Some("not_logged_in"),
            StoirError::Forbidden(_) => Some("forbidden"),
            StoirError::SetupComplete => Some("setup_complete"),
            StoirError::Internal(_) => None,
        }
    }

    /// Rebuilds an error received over the wire. Structured fields that the
    /// response does not carry are filled with the server's message.
    pub fn from_response(resp: ErrorResponse) -> Self {
        let msg = resp.error;
        match resp.code.as_deref() {
            Some("not_found") => StoirError::NotFound {
                entity: String::new(),
                id: msg,
            },
            Some("already_exists") => StoirError::AlreadyExists {
                entity: String::new(),
                id: msg,
            },
            Some("in_use") => StoirError::InUse {
                entity: String::new(),
                id: msg,
            },
            Some("insufficient_stock") => StoirError::InsufficientStock {
                item: msg,
                available: 0,
                requested: 0,
            },
            Some("invalid_date") => StoirError::InvalidDate(msg),
            Some("invalid_argument") => StoirError::InvalidArgument(msg),
            Some("unauthorized") => StoirError::Unauthorized,
            Some("not_logged_in") => StoirError::NotLoggedIn,
            Some("forbidden") => StoirError::Forbidden(msg),
            Some("setup_complete") => StoirError::SetupComplete,
            _ => StoirError::Internal(msg),
        }
    }
}

impl From<rusqlite::Error> for StoirError {
    fn from(err: rusqlite::Error) -> Self {
        StoirError::Internal(format!("database error: {err}"))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl From<&StoirError> for ErrorResponse {
    fn from(err: &StoirError) -> Self {
        ErrorResponse {
            error: err.to_string(),
            code: err.code().map(String::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_round_trips_code() {
        let err = StoirError::InvalidDate("2026-13-01".into());
        let resp = ErrorResponse::from(&err);
        assert_eq!(resp.code.as_deref(), Some("invalid_date"));
        assert!(resp.error.contains("2026-13-01"));

        let back = StoirError::from_response(resp);
        assert_eq!(back.code(), Some("invalid_date"));
    }

    #[test]
    fn access_errors_keep_their_codes() {
        for err in [
            StoirError::NotLoggedIn,
            StoirError::Forbidden("staff may not use settings".into()),
        ] {
            let back = StoirError::from_response(ErrorResponse::from(&err));
            assert_eq!(back.code(), err.code());
        }
    }

    #[test]
    fn internal_has_no_code() {
        let resp = ErrorResponse::from(&StoirError::Internal("boom".into()));
        assert!(resp.code.is_none());
        let json = serde_json::to_string(&resp).unwrap();
        assert!(!json.contains("code"));
    }
}
