//! OpenAPI documentation for the analytics endpoints.
//!
//! The document is served at `/api-docs/openapi.json` and rendered with Scalar at `/docs`.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
};

use crate::api;
use crate::api::models::analytics::{
    ActiveUsersData, ActiveUsersRow, AnalyticsResponse, ResponseMeta, ResponseStatus, RevenueData, RevenueRow, SalesData, SalesRow,
};

/// Shared-secret header scheme. Documents the default header name; deployments may rename it.
struct ApiKeySecurityAddon;

impl Modify for ApiKeySecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.security_schemes.insert(
            "ApiKeyAuth".to_string(),
            SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                "X-API-Key",
                "Shared API key. Requests without the configured key are rejected with 401.",
            ))),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Analytics API",
        description = "Cached analytics queries (sales, users, revenue) over the reporting warehouse"
    ),
    modifiers(&ApiKeySecurityAddon),
    paths(
        api::handlers::analytics::get_revenue,
        api::handlers::analytics::get_sales,
        api::handlers::analytics::get_active_users,
    ),
    components(schemas(
        AnalyticsResponse<RevenueData>,
        AnalyticsResponse<SalesData>,
        AnalyticsResponse<ActiveUsersData>,
        RevenueRow,
        SalesRow,
        ActiveUsersRow,
        ResponseMeta,
        ResponseStatus,
    )),
    tags(
        (name = "revenue", description = "Daily revenue per product"),
        (name = "sales", description = "Monthly sales per region"),
        (name = "users", description = "Daily active users"),
    )
)]
pub struct ApiDoc;
