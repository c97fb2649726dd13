//! Unified client error model.
//! Every failure in the client resolves to one of these kinds; none of them is fatal.
//! Views surface `Validation`/`Authentication` inline, while `Authorization` has already
//! triggered the global sign-out by the time a caller sees it.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    /// Input rejected locally, before any network call.
    Validation { code: String, message: String },
    /// Login or registration rejected by the server.
    Authentication { code: String, message: String },
    /// Credential rejected mid-session.
    Authorization { code: String, message: String },
    Forbidden { code: String, message: String },
    NotFound { code: String, message: String },
    /// Any other 4xx the server answered with.
    Rejected { code: String, message: String },
    /// Session transition not valid from the current state.
    Conflict { code: String, message: String },
    Network { code: String, message: String },
    Server { code: String, message: String },
    Storage { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::Validation { code, .. }
            | AppError::Authentication { code, .. }
            | AppError::Authorization { code, .. }
            | AppError::Forbidden { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::Rejected { code, .. }
            | AppError::Conflict { code, .. }
            | AppError::Network { code, .. }
            | AppError::Server { code, .. }
            | AppError::Storage { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::Validation { message, .. }
            | AppError::Authentication { message, .. }
            | AppError::Authorization { message, .. }
            | AppError::Forbidden { message, .. }
            | AppError::NotFound { message, .. }
            | AppError::Rejected { message, .. }
            | AppError::Conflict { message, .. }
            | AppError::Network { message, .. }
            | AppError::Server { message, .. }
            | AppError::Storage { message, .. } => message.as_str(),
        }
    }

    pub fn validation<S: Into<String>>(code: S, msg: S) -> Self { AppError::Validation { code: code.into(), message: msg.into() } }
    pub fn authentication<S: Into<String>>(code: S, msg: S) -> Self { AppError::Authentication { code: code.into(), message: msg.into() } }
    pub fn authorization<S: Into<String>>(code: S, msg: S) -> Self { AppError::Authorization { code: code.into(), message: msg.into() } }
    pub fn forbidden<S: Into<String>>(code: S, msg: S) -> Self { AppError::Forbidden { code: code.into(), message: msg.into() } }
    pub fn not_found<S: Into<String>>(code: S, msg: S) -> Self { AppError::NotFound { code: code.into(), message: msg.into() } }
    pub fn rejected<S: Into<String>>(code: S, msg: S) -> Self { AppError::Rejected { code: code.into(), message: msg.into() } }
    pub fn conflict<S: Into<String>>(code: S, msg: S) -> Self { AppError::Conflict { code: code.into(), message: msg.into() } }
    pub fn network<S: Into<String>>(code: S, msg: S) -> Self { AppError::Network { code: code.into(), message: msg.into() } }
    pub fn server<S: Into<String>>(code: S, msg: S) -> Self { AppError::Server { code: code.into(), message: msg.into() } }
    pub fn storage<S: Into<String>>(code: S, msg: S) -> Self { AppError::Storage { code: code.into(), message: msg.into() } }

    /// Map a non-success HTTP status to an error kind.
    /// `credentialed` tells whether the request carried a credential: a 401 on an anonymous
    /// call (login) is a rejected login, not a revoked session.
    pub fn from_status(status: u16, credentialed: bool, message: String) -> Self {
        match status {
            401 if credentialed => AppError::authorization("session_rejected".to_string(), message),
            401 => AppError::authentication("invalid_credentials".to_string(), message),
            403 => AppError::forbidden("forbidden".to_string(), message),
            404 => AppError::not_found("not_found".to_string(), message),
            400..=499 => AppError::rejected(format!("http_{}", status), message),
            _ => AppError::server(format!("http_{}", status), message),
        }
    }

    /// True for the mid-session credential rejection the gateway handles globally.
    pub fn is_authorization(&self) -> bool { matches!(self, AppError::Authorization { .. }) }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return AppError::Server { code: "decode_error".into(), message: err.to_string() };
        }
        let code = if err.is_timeout() { "timeout" } else { "unreachable" };
        AppError::Network { code: code.into(), message: err.to_string() }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage { code: "io_error".into(), message: err.to_string() }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Server { code: "decode_error".into(), message: err.to_string() }
    }
}
