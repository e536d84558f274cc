//! Request and response models for the delivery API.

pub mod common;
pub mod error;

pub use common::{ApiResponse, ResponseMeta};
pub use error::{ApiResult, ErrorResponse};
