// Mapping REST API boundary: typed client and error taxonomy

pub mod client;
pub mod errors;

pub use client::{MappingApi, Snap2SnomedClient};
pub use errors::{ApiError, Notification, ProblemDetail, Severity};
