//! API request and response data models.
//!
//! - [`analytics`]: Filters, result rows, cached payloads and response envelopes
//! - [`pagination`]: Page request validation and page arithmetic

pub mod analytics;
pub mod pagination;
