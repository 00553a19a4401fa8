//! Data Transfer Objects for REST request/response serialization.

pub mod price_dto;
pub mod system_dto;

pub use price_dto::*;
pub use system_dto::*;
