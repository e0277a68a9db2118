//! # Custom Extractors & Validation
//!
//! The [`Validate`] trait for request DTOs, and helpers that turn JSON
//! rejections and path segments into [`AppError`]s.

use axum::extract::rejection::JsonRejection;
use axum::Json;

use crate::error::AppError;

/// Business-rule checks beyond what serde enforces.
pub trait Validate {
    /// Returns an error message on failure.
    fn validate(&self) -> Result<(), String>;
}

/// Extract a JSON body, mapping deserialization errors to [`AppError::BadRequest`].
pub fn extract_json<T>(result: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    result
        .map(|Json(v)| v)
        .map_err(|err| AppError::BadRequest(err.body_text()))
}

/// Extract a JSON body and validate it.
pub fn extract_validated_json<T: Validate>(
    result: Result<Json<T>, JsonRejection>,
) -> Result<T, AppError> {
    let value = extract_json(result)?;
    value.validate().map_err(AppError::Validation)?;
    Ok(value)
}

/// Parse a path segment into a validated identifier (422 on failure).
pub fn parse_path<T>(raw: String) -> Result<T, AppError>
where
    T: TryFrom<String, Error = farmcert_core::ValidationError>,
{
    T::try_from(raw).map_err(AppError::from)
}
