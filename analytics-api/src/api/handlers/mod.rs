//! HTTP request handlers.

pub mod analytics;
