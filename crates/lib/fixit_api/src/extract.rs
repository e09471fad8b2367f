//! Request extractors with [`AppError`] rejections.

use axum::extract::FromRequest;

use crate::error::AppError;

/// `Json` whose rejections (wrong content type, syntax or field types) are
/// 400 validation errors.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct JsonBody<T>(pub T);
