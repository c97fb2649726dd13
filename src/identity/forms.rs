//! Form state for the login, registration and upload screens.
//!
//! Every form is validated in full before any request is built; the first failing rule is
//! reported as a `ValidationError`.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use crate::error::AppError;
use crate::model::{MeterType, Role};

pub const MIN_PASSWORD_LEN: usize = 6;
pub const MAX_IMAGE_BYTES: u64 = 10 * 1024 * 1024;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern compiles")
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("email is required")]
    MissingEmail,
    #[error("'{0}' is not a valid email address")]
    MalformedEmail(String),
    #[error("password is required")]
    MissingPassword,
    #[error("passwords do not match")]
    PasswordMismatch,
    #[error("password must be at least 6 characters long")]
    PasswordTooShort,
    #[error("full name is required")]
    MissingFullName,
    #[error("apartment number is required for residents")]
    MissingApartment,
    #[error("please enter a valid reading value")]
    InvalidReading,
    #[error("please select an image of the meter")]
    MissingImage,
    #[error("please select a valid image file (JPEG, PNG, GIF, WebP)")]
    UnsupportedImage,
    #[error("file size must be less than 10MB")]
    ImageTooLarge,
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::MissingEmail => "missing_email",
            ValidationError::MalformedEmail(_) => "malformed_email",
            ValidationError::MissingPassword => "missing_password",
            ValidationError::PasswordMismatch => "password_mismatch",
            ValidationError::PasswordTooShort => "password_too_short",
            ValidationError::MissingFullName => "missing_full_name",
            ValidationError::MissingApartment => "missing_apartment",
            ValidationError::InvalidReading => "invalid_reading",
            ValidationError::MissingImage => "missing_image",
            ValidationError::UnsupportedImage => "unsupported_image",
            ValidationError::ImageTooLarge => "image_too_large",
        }
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::validation(err.code().to_string(), err.to_string())
    }
}

fn check_email(raw: &str) -> Result<String, ValidationError> {
    let email = raw.trim();
    if email.is_empty() {
        return Err(ValidationError::MissingEmail);
    }
    if !EMAIL_RE.is_match(email) {
        return Err(ValidationError::MalformedEmail(email.to_string()));
    }
    Ok(email.to_string())
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

/// Body of `POST /auth/login`, only obtainable from a validated form.
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

impl LoginForm {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self { email: email.into(), password: password.into() }
    }

    pub fn validate(&self) -> Result<LoginRequest, ValidationError> {
        let email = check_email(&self.email)?;
        if self.password.is_empty() {
            return Err(ValidationError::MissingPassword);
        }
        Ok(LoginRequest { email, password: self.password.clone() })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegisterForm {
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub full_name: String,
    pub role: Role,
    pub apartment_number: Option<String>,
}

impl Default for RegisterForm {
    fn default() -> Self {
        Self {
            email: String::new(),
            password: String::new(),
            confirm_password: String::new(),
            full_name: String::new(),
            role: Role::Resident,
            apartment_number: None,
        }
    }
}

/// Body of `POST /auth/register`.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apartment_number: Option<String>,
}

impl RegisterRequest {
    pub fn login(&self) -> LoginRequest {
        LoginRequest { email: self.email.clone(), password: self.password.clone() }
    }
}

impl RegisterForm {
    pub fn validate(&self) -> Result<RegisterRequest, ValidationError> {
        let email = check_email(&self.email)?;
        let full_name = self.full_name.trim();
        if full_name.is_empty() {
            return Err(ValidationError::MissingFullName);
        }
        if self.password.is_empty() {
            return Err(ValidationError::MissingPassword);
        }
        if self.password != self.confirm_password {
            return Err(ValidationError::PasswordMismatch);
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ValidationError::PasswordTooShort);
        }
        let apartment = self
            .apartment_number
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        // only residents carry an apartment number
        let apartment_number = match self.role {
            Role::Resident => Some(apartment.ok_or(ValidationError::MissingApartment)?),
            Role::Manager | Role::Admin => None,
        };
        Ok(RegisterRequest {
            email,
            password: self.password.clone(),
            full_name: full_name.to_string(),
            role: self.role,
            apartment_number,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadReadingForm {
    pub meter_type: MeterType,
    pub reading_value: String,
    pub image: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadingUpload {
    pub meter_type: MeterType,
    pub reading_value: f64,
    pub image: PathBuf,
    pub file_name: String,
    pub mime: &'static str,
}

pub fn image_mime(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

impl UploadReadingForm {
    /// Checks the value and the image file. Touches the filesystem for the size check only.
    pub fn validate(&self) -> Result<ReadingUpload, ValidationError> {
        let image = self.image.as_ref().ok_or(ValidationError::MissingImage)?;
        let reading_value = self
            .reading_value
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v > 0.0)
            .ok_or(ValidationError::InvalidReading)?;
        let mime = image_mime(image).ok_or(ValidationError::UnsupportedImage)?;
        let meta = std::fs::metadata(image).map_err(|_| ValidationError::MissingImage)?;
        if !meta.is_file() {
            return Err(ValidationError::MissingImage);
        }
        if meta.len() > MAX_IMAGE_BYTES {
            return Err(ValidationError::ImageTooLarge);
        }
        let file_name = image
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "meter".to_string());
        Ok(ReadingUpload { meter_type: self.meter_type, reading_value, image: image.clone(), file_name, mime })
    }
}
