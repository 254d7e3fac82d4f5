//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers for the analytics endpoints
//! - **[`models`]**: Query filters, result rows and response envelopes
//!
//! # API Structure
//!
//! All analytics endpoints require the shared credential header and live under
//! `/api/v1/analytics`:
//!
//! - `GET /api/v1/analytics/revenue/`: daily revenue per product, paginated
//! - `GET /api/v1/analytics/sales/`: monthly sales per region
//! - `GET /api/v1/analytics/users/active`: daily active users
//!
//! API documentation is served at `/docs` when the server is running.

pub mod handlers;
pub mod models;
