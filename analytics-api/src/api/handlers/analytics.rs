//! Analytics read endpoints.
//!
//! All three endpoints run the same cache-aside pipeline, [`read_through`], instantiated once per
//! resource through [`AnalyticsResource`]:
//!
//! 1. resolve pagination (paginated resources only; invalid values are a 400)
//! 2. build the cache key and look it up; a hit is returned as-is with a fresh timestamp
//! 3. on a miss, run the resource's [`QueryPlan`] (count first when paginating) on one warehouse
//!    connection and shape the rows
//! 4. store the shaped rows, plus the row count when paginating, under the key
//! 5. wrap the rows in the response envelope
//!
//! A warehouse failure returns before step 4, so nothing is cached for a failed request. Cache
//! failures never fail a request; see [`CacheAside`](crate::cache::CacheAside).

use axum::{
    Json,
    extract::{Query, State, rejection::QueryRejection},
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::AppState;
use crate::api::models::analytics::{
    ActiveUsersData, ActiveUsersQuery, ActiveUsersRow, AnalyticsResponse, CachedPayload, ResponseMeta, RevenueData, RevenueQuery,
    RevenueRow, SalesData, SalesQuery, SalesRow,
};
use crate::api::models::pagination::PageRequest;
use crate::cache::CacheKey;
use crate::config::TablesConfig;
use crate::errors::Error;
use crate::warehouse::{self, Param, QueryPlan, RawRow, Statement, StatementBuilder};

/// One analytics resource: how to key, query and shape it.
pub trait AnalyticsResource {
    /// Label used in logs and cache metrics
    const NAME: &'static str;
    /// Whether requests are paged and responses carry page metadata
    const PAGINATED: bool;

    type Query: Send + Sync;
    type Row: Serialize + DeserializeOwned + Send + Sync;
    type Data;

    /// Raw `page` / `page_size` from the request; only consulted when [`Self::PAGINATED`]
    fn page_params(_query: &Self::Query) -> (Option<i64>, Option<i64>) {
        (None, None)
    }

    /// Every field that changes the result must be part of the key
    fn cache_key(query: &Self::Query, page: Option<PageRequest>) -> CacheKey;

    fn plan(query: &Self::Query, page: Option<PageRequest>, tables: &TablesConfig) -> QueryPlan;

    /// Convert one warehouse row into the response row
    fn shape(row: &RawRow) -> warehouse::Result<Self::Row>;

    fn wrap(rows: Vec<Self::Row>) -> Self::Data;
}

/// The cache-aside paginated query pipeline shared by every resource.
#[instrument(skip_all, fields(resource = R::NAME))]
pub async fn read_through<R: AnalyticsResource>(state: &AppState, query: R::Query) -> Result<AnalyticsResponse<R::Data>, Error> {
    let page = if R::PAGINATED {
        let (page, page_size) = R::page_params(&query);
        Some(PageRequest::resolve(page, page_size, &state.config.pagination)?)
    } else {
        None
    };

    let key = R::cache_key(&query, page);
    let cached = state
        .cache
        .lookup::<CachedPayload<R::Row>>(R::NAME, &key)
        .await
        // A paginated entry without its count cannot produce full metadata; recompute it
        .filter(|payload| !R::PAGINATED || payload.total_records.is_some());

    let payload = match cached {
        Some(payload) => payload,
        None => {
            let plan = R::plan(&query, page, &state.config.warehouse.tables);
            let output = state.warehouse.execute(&plan).await?;
            let rows = output.rows.iter().map(R::shape).collect::<warehouse::Result<Vec<_>>>()?;
            debug!(rows = rows.len(), total_records = ?output.total_records, "Fetched from warehouse");

            let payload = CachedPayload {
                rows,
                total_records: output.total_records,
            };
            state.cache.store(R::NAME, &key, &payload).await;
            payload
        }
    };

    let meta = ResponseMeta::new(page, payload.total_records);
    Ok(AnalyticsResponse::success(R::wrap(payload.rows), meta))
}

/// Daily revenue per product, paginated
pub struct Revenue;

impl Revenue {
    /// `SELECT day, product, SUM(measure) ... GROUP BY day, product` with the range and
    /// optional product predicate. Shared by the count and row statements so they always agree.
    fn aggregate(query: &RevenueQuery, tables: &TablesConfig) -> StatementBuilder {
        let table = &tables.revenue;
        let day = format!("to_char(date_trunc('day', {}::date), 'YYYY-MM-DD')", table.timestamp_column);

        let mut sql = StatementBuilder::new(format!(
            "SELECT {day} AS month, {dim} AS product, SUM({measure}) AS total_revenue FROM {relation} WHERE {day} >= ",
            dim = table.dimension_column,
            measure = table.measure_column,
            relation = table.relation,
        ));
        sql.push_bind(Param::Text(query.start.clone()))
            .push(&format!(" AND {day} <= "))
            .push_bind(Param::Text(query.end.clone()));
        if let Some(product) = &query.product {
            sql.push(&format!(" AND {} = ", table.dimension_column))
                .push_bind(Param::Text(product.clone()));
        }
        sql.push(" GROUP BY 1, 2");
        sql
    }
}

impl AnalyticsResource for Revenue {
    const NAME: &'static str = "revenue";
    const PAGINATED: bool = true;

    type Query = RevenueQuery;
    type Row = RevenueRow;
    type Data = RevenueData;

    fn page_params(query: &RevenueQuery) -> (Option<i64>, Option<i64>) {
        (query.page, query.page_size)
    }

    fn cache_key(query: &RevenueQuery, page: Option<PageRequest>) -> CacheKey {
        CacheKey::new(Self::NAME)
            .segment(&query.start)
            .segment(&query.end)
            .optional(query.product.as_deref())
            .optional(page.map(|page| page.page))
            .optional(page.map(|page| page.page_size))
    }

    fn plan(query: &RevenueQuery, page: Option<PageRequest>, tables: &TablesConfig) -> QueryPlan {
        let mut rows = Self::aggregate(query, tables);
        // Product breaks ties so consecutive pages never overlap
        rows.push(" ORDER BY month, product");

        let count = page.map(|page| {
            rows.push(" LIMIT ")
                .push_bind(Param::Int(page.page_size))
                .push(" OFFSET ")
                .push_bind(Param::Int(page.offset()));

            let inner = Self::aggregate(query, tables).build();
            Statement {
                sql: format!("SELECT COUNT(*) FROM ({}) AS total_count", inner.sql),
                params: inner.params,
            }
        });

        QueryPlan { count, rows: rows.build() }
    }

    fn shape(row: &RawRow) -> warehouse::Result<RevenueRow> {
        Ok(RevenueRow {
            month: row.text(0, "month")?,
            product: row.optional_text(1, "product")?,
            total_revenue: row.float(2, "total_revenue")?,
        })
    }

    fn wrap(rows: Vec<RevenueRow>) -> RevenueData {
        RevenueData { revenue: rows }
    }
}

/// Monthly sales per region
pub struct Sales;

impl AnalyticsResource for Sales {
    const NAME: &'static str = "sales";
    const PAGINATED: bool = false;

    type Query = SalesQuery;
    type Row = SalesRow;
    type Data = SalesData;

    fn cache_key(query: &SalesQuery, _page: Option<PageRequest>) -> CacheKey {
        CacheKey::new(Self::NAME)
            .segment(&query.start)
            .segment(&query.end)
            .optional(query.region.as_deref())
    }

    fn plan(query: &SalesQuery, _page: Option<PageRequest>, tables: &TablesConfig) -> QueryPlan {
        // Compared as text so DATE and string month columns both work. A DATE renders as
        // YYYY-MM-DD, so a month-only bound excludes the boundary day (`end=2025-05` drops
        // 2025-05-01); callers pass full dates against DATE columns. The cast also disables
        // Redshift sort-key range pruning on this column.
        let mut rows = StatementBuilder::new(format!(
            "SELECT month, region, total, orders FROM {} WHERE month::varchar >= ",
            tables.sales
        ));
        rows.push_bind(Param::Text(query.start.clone()))
            .push(" AND month::varchar <= ")
            .push_bind(Param::Text(query.end.clone()));
        if let Some(region) = &query.region {
            rows.push(" AND region = ").push_bind(Param::Text(region.clone()));
        }
        rows.push(" ORDER BY month");

        QueryPlan {
            count: None,
            rows: rows.build(),
        }
    }

    fn shape(row: &RawRow) -> warehouse::Result<SalesRow> {
        Ok(SalesRow {
            month: row.text(0, "month")?,
            region: row.optional_text(1, "region")?,
            total: row.float(2, "total")?,
            orders: row.integer(3, "orders")?,
        })
    }

    fn wrap(rows: Vec<SalesRow>) -> SalesData {
        SalesData { sales: rows }
    }
}

/// Daily active users
pub struct ActiveUsers;

impl AnalyticsResource for ActiveUsers {
    const NAME: &'static str = "active_users";
    const PAGINATED: bool = false;

    type Query = ActiveUsersQuery;
    type Row = ActiveUsersRow;
    type Data = ActiveUsersData;

    fn cache_key(query: &ActiveUsersQuery, _page: Option<PageRequest>) -> CacheKey {
        CacheKey::new("users").segment("active").segment(&query.start).segment(&query.end)
    }

    fn plan(query: &ActiveUsersQuery, _page: Option<PageRequest>, tables: &TablesConfig) -> QueryPlan {
        // Same text comparison as sales
        let mut rows = StatementBuilder::new(format!(
            "SELECT date, active_users FROM {} WHERE date::varchar >= ",
            tables.active_users
        ));
        rows.push_bind(Param::Text(query.start.clone()))
            .push(" AND date::varchar <= ")
            .push_bind(Param::Text(query.end.clone()))
            .push(" ORDER BY date");

        QueryPlan {
            count: None,
            rows: rows.build(),
        }
    }

    fn shape(row: &RawRow) -> warehouse::Result<ActiveUsersRow> {
        Ok(ActiveUsersRow {
            date: row.text(0, "date")?,
            active_users: row.integer(1, "active_users")?,
        })
    }

    fn wrap(rows: Vec<ActiveUsersRow>) -> ActiveUsersData {
        ActiveUsersData { active_users: rows }
    }
}

/// Get revenue
#[utoipa::path(
    get,
    path = "/api/v1/analytics/revenue/",
    tag = "revenue",
    summary = "Get revenue",
    description = "Revenue summed per day and product over an inclusive date range, optionally for one product. Paginated.",
    params(RevenueQuery),
    responses(
        (status = 200, description = "Revenue rows for the requested page", body = AnalyticsResponse<RevenueData>),
        (status = 400, description = "Missing dates or out-of-range pagination"),
        (status = 401, description = "Missing or invalid API key"),
        (status = 500, description = "Warehouse failure"),
    ),
    security(("ApiKeyAuth" = []))
)]
#[instrument(skip_all)]
pub async fn get_revenue(
    State(state): State<AppState>,
    query: Result<Query<RevenueQuery>, QueryRejection>,
) -> Result<Json<AnalyticsResponse<RevenueData>>, Error> {
    let Query(query) = query?;
    read_through::<Revenue>(&state, query).await.map(Json)
}

/// Get sales
#[utoipa::path(
    get,
    path = "/api/v1/analytics/sales/",
    tag = "sales",
    summary = "Get sales",
    description = "Monthly sales over an inclusive month range, optionally for one region.",
    params(SalesQuery),
    responses(
        (status = 200, description = "Sales rows", body = AnalyticsResponse<SalesData>),
        (status = 400, description = "Missing start or end"),
        (status = 401, description = "Missing or invalid API key"),
        (status = 500, description = "Warehouse failure"),
    ),
    security(("ApiKeyAuth" = []))
)]
#[instrument(skip_all)]
pub async fn get_sales(
    State(state): State<AppState>,
    query: Result<Query<SalesQuery>, QueryRejection>,
) -> Result<Json<AnalyticsResponse<SalesData>>, Error> {
    let Query(query) = query?;
    read_through::<Sales>(&state, query).await.map(Json)
}

/// Get daily active users
#[utoipa::path(
    get,
    path = "/api/v1/analytics/users/active",
    tag = "users",
    summary = "Get daily active users",
    description = "Distinct active users per day over an inclusive date range.",
    params(ActiveUsersQuery),
    responses(
        (status = 200, description = "Active user counts", body = AnalyticsResponse<ActiveUsersData>),
        (status = 400, description = "Missing start or end"),
        (status = 401, description = "Missing or invalid API key"),
        (status = 500, description = "Warehouse failure"),
    ),
    security(("ApiKeyAuth" = []))
)]
#[instrument(skip_all)]
pub async fn get_active_users(
    State(state): State<AppState>,
    query: Result<Query<ActiveUsersQuery>, QueryRejection>,
) -> Result<Json<AnalyticsResponse<ActiveUsersData>>, Error> {
    let Query(query) = query?;
    read_through::<ActiveUsers>(&state, query).await.map(Json)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::http::StatusCode;
    use serde_json::{Value, json};

    use super::*;
    use crate::cache::{CacheStore, MemoryCacheStore};
    use crate::test_utils::{CountingCacheStore, FailingCacheStore, FakeWarehouse, TEST_API_KEY, create_test_app};
    use crate::warehouse::{Cell, QueryOutput};

    const API_KEY_HEADER: &str = "X-API-Key";

    fn revenue_rows(total_records: i64) -> QueryOutput {
        QueryOutput {
            total_records: Some(total_records),
            rows: vec![
                RawRow::new(vec![
                    Cell::Text("2025-01-01".into()),
                    Cell::Text("WidgetA".into()),
                    Cell::Float(1500.5),
                ]),
                RawRow::new(vec![Cell::Text("2025-01-02".into()), Cell::Null, Cell::Int(80)]),
            ],
        }
    }

    fn sales_rows() -> QueryOutput {
        QueryOutput {
            total_records: None,
            rows: vec![RawRow::new(vec![
                Cell::Text("2025-01".into()),
                Cell::Text("US".into()),
                Cell::Float(1200.0),
                Cell::Int(14),
            ])],
        }
    }

    fn active_users_rows() -> QueryOutput {
        QueryOutput {
            total_records: None,
            rows: vec![
                RawRow::new(vec![Cell::Text("2025-01-01".into()), Cell::Int(321)]),
                RawRow::new(vec![Cell::Text("2025-01-02".into()), Cell::Text("298".into())]),
            ],
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_revenue_miss_then_hit() {
        let warehouse = Arc::new(FakeWarehouse::returning(revenue_rows(5)));
        let cache = Arc::new(CountingCacheStore::new());
        let server = create_test_app(warehouse.clone(), cache.clone());

        let url = "/api/v1/analytics/revenue/?start=2025-01-01&end=2025-01-31";
        let first = server.get(url).add_header(API_KEY_HEADER, TEST_API_KEY).await;
        first.assert_status_ok();
        assert_eq!(warehouse.calls(), 1);
        assert_eq!(cache.sets(), 1);
        assert_eq!(cache.last_ttl(), Some(Duration::from_secs(3600)));

        let first: Value = first.json();
        assert_eq!(first["status"], "success");
        assert_eq!(
            first["data"]["revenue"],
            json!([
                { "month": "2025-01-01", "product": "WidgetA", "total_revenue": 1500.5 },
                { "month": "2025-01-02", "product": null, "total_revenue": 80.0 },
            ])
        );
        assert_eq!(first["meta"]["page"], 1);
        assert_eq!(first["meta"]["page_size"], 2);
        assert_eq!(first["meta"]["total_records"], 5);
        assert_eq!(first["meta"]["total_pages"], 3);

        let second = server.get(url).add_header(API_KEY_HEADER, TEST_API_KEY).await;
        second.assert_status_ok();
        assert_eq!(warehouse.calls(), 1, "second request must be served from cache");
        assert_eq!(cache.sets(), 1);

        // Same data and page metadata on the hit path; only the timestamp is live
        let second: Value = second.json();
        assert_eq!(second["data"], first["data"]);
        for field in ["page", "page_size", "total_records", "total_pages"] {
            assert_eq!(second["meta"][field], first["meta"][field], "meta.{field}");
        }
        assert!(second["meta"]["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_warm_key_issues_no_warehouse_query() {
        let warehouse = Arc::new(FakeWarehouse::returning(sales_rows()));
        let store = Arc::new(MemoryCacheStore::new(100));
        store
            .set_ex(
                "sales:2025-01:2025-05:",
                r#"{"rows":[{"month":"2025-02","region":"EU","total":10,"orders":"3"}]}"#,
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        let server = create_test_app(warehouse.clone(), store);

        let response = server
            .get("/api/v1/analytics/sales/?start=2025-01&end=2025-05")
            .add_header(API_KEY_HEADER, TEST_API_KEY)
            .await;

        response.assert_status_ok();
        assert_eq!(warehouse.calls(), 0);
        let body: Value = response.json();
        // Numbers come back with their row types regardless of how they were cached
        assert_eq!(
            body["data"]["sales"],
            json!([{ "month": "2025-02", "region": "EU", "total": 10.0, "orders": 3 }])
        );
        assert!(body["data"]["sales"][0]["total"].is_f64());
        assert!(body["data"]["sales"][0]["orders"].is_i64());
        let meta_keys: Vec<_> = body["meta"].as_object().unwrap().keys().cloned().collect();
        assert_eq!(meta_keys, vec!["timestamp".to_string()]);
    }

    #[tokio::test]
    async fn test_paginated_entry_without_count_is_recomputed() {
        let warehouse = Arc::new(FakeWarehouse::returning(revenue_rows(5)));
        let store = Arc::new(MemoryCacheStore::new(100));
        store
            .set_ex(
                "revenue:2025-01-01:2025-01-31::1:2",
                r#"{"rows":[{"month":"2025-01-01","product":"Stale","total_revenue":1}]}"#,
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        let server = create_test_app(warehouse.clone(), store.clone());

        let response = server
            .get("/api/v1/analytics/revenue/?start=2025-01-01&end=2025-01-31")
            .add_header(API_KEY_HEADER, TEST_API_KEY)
            .await;

        response.assert_status_ok();
        assert_eq!(warehouse.calls(), 1);
        let body: Value = response.json();
        assert_eq!(body["data"]["revenue"][0]["product"], "WidgetA");
        assert_eq!(body["meta"]["total_records"], 5);

        // The entry was rewritten with its count, so the next request is a hit
        let cached = store.get("revenue:2025-01-01:2025-01-31::1:2").await.unwrap().unwrap();
        assert!(cached.contains(r#""total_records":5"#));
        server
            .get("/api/v1/analytics/revenue/?start=2025-01-01&end=2025-01-31")
            .add_header(API_KEY_HEADER, TEST_API_KEY)
            .await
            .assert_status_ok();
        assert_eq!(warehouse.calls(), 1);
    }

    #[tokio::test]
    async fn test_page_beyond_total_is_empty_with_true_page_count() {
        let warehouse = Arc::new(FakeWarehouse::returning(QueryOutput {
            total_records: Some(5),
            rows: vec![],
        }));
        let server = create_test_app(warehouse.clone(), Arc::new(MemoryCacheStore::new(100)));

        let response = server
            .get("/api/v1/analytics/revenue/?start=2025-01-01&end=2025-01-31&page=10&page_size=2")
            .add_header(API_KEY_HEADER, TEST_API_KEY)
            .await;

        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["data"]["revenue"], json!([]));
        assert_eq!(body["meta"]["page"], 10);
        assert_eq!(body["meta"]["total_records"], 5);
        assert_eq!(body["meta"]["total_pages"], 3);

        let plan = warehouse.last_plan().unwrap();
        assert!(plan.count.is_some());
        assert_eq!(plan.rows.params[2..], [Param::Int(2), Param::Int(18)]);
    }

    #[tokio::test]
    async fn test_out_of_range_pagination_is_rejected_before_backends() {
        let warehouse = Arc::new(FakeWarehouse::returning(revenue_rows(5)));
        let cache = Arc::new(CountingCacheStore::new());
        let server = create_test_app(warehouse.clone(), cache.clone());

        for query in ["page=0", "page=-3", "page_size=0", "page_size=101", "page=abc"] {
            let response = server
                .get(&format!("/api/v1/analytics/revenue/?start=2025-01-01&end=2025-01-31&{query}"))
                .add_header(API_KEY_HEADER, TEST_API_KEY)
                .await;
            response.assert_status(StatusCode::BAD_REQUEST);
            let body: Value = response.json();
            assert!(body["detail"].is_string(), "{query}: {body}");
        }

        assert_eq!(warehouse.calls(), 0);
        assert_eq!(cache.gets(), 0);
    }

    #[tokio::test]
    async fn test_missing_dates_are_bad_request() {
        let warehouse = Arc::new(FakeWarehouse::default());
        let server = create_test_app(warehouse.clone(), Arc::new(MemoryCacheStore::new(100)));

        for url in [
            "/api/v1/analytics/revenue/?start=2025-01-01",
            "/api/v1/analytics/sales/?end=2025-05",
            "/api/v1/analytics/users/active",
        ] {
            let response = server.get(url).add_header(API_KEY_HEADER, TEST_API_KEY).await;
            response.assert_status(StatusCode::BAD_REQUEST);
        }
        assert_eq!(warehouse.calls(), 0);
    }

    #[tokio::test]
    async fn test_bad_credentials_rejected_before_any_backend_access() {
        let warehouse = Arc::new(FakeWarehouse::returning(sales_rows()));
        let cache = Arc::new(CountingCacheStore::new());
        let server = create_test_app(warehouse.clone(), cache.clone());

        for url in [
            "/api/v1/analytics/revenue/?start=2025-01-01&end=2025-01-31",
            "/api/v1/analytics/revenue?start=2025-01-01&end=2025-01-31",
            "/api/v1/analytics/sales/?start=2025-01&end=2025-05",
            "/api/v1/analytics/sales?start=2025-01&end=2025-05",
            "/api/v1/analytics/users/active?start=2025-01-01&end=2025-01-31",
        ] {
            let missing = server.get(url).await;
            missing.assert_status(StatusCode::UNAUTHORIZED);
            assert_eq!(missing.json::<Value>(), json!({ "detail": "Invalid API Key" }));

            let wrong = server.get(url).add_header(API_KEY_HEADER, "not-the-key").await;
            wrong.assert_status(StatusCode::UNAUTHORIZED);
            assert_eq!(wrong.json::<Value>(), json!({ "detail": "Invalid API Key" }));
        }

        // Even an invalid query is a 401 first
        let response = server.get("/api/v1/analytics/revenue/?page=0").await;
        response.assert_status(StatusCode::UNAUTHORIZED);

        assert_eq!(warehouse.calls(), 0);
        assert_eq!(cache.gets(), 0);
        assert_eq!(cache.sets(), 0);
    }

    #[test_log::test(tokio::test)]
    async fn test_warehouse_failure_is_500_and_never_cached() {
        let warehouse = Arc::new(FakeWarehouse::failing("could not connect to server: Connection refused"));
        let cache = Arc::new(CountingCacheStore::new());
        let server = create_test_app(warehouse.clone(), cache.clone());

        for url in [
            "/api/v1/analytics/revenue/?start=2025-01-01&end=2025-01-31",
            "/api/v1/analytics/sales/?start=2025-01&end=2025-05",
            "/api/v1/analytics/users/active?start=2025-01-01&end=2025-01-31",
        ] {
            let response = server.get(url).add_header(API_KEY_HEADER, TEST_API_KEY).await;
            response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
            let body: Value = response.json();
            assert_eq!(body["detail"], "could not connect to server: Connection refused");
            assert_eq!(body["kind"], "warehouse_unavailable");
        }
        assert_eq!(cache.sets(), 0);

        // Nothing was cached, so a retry goes back to the warehouse
        let response = server
            .get("/api/v1/analytics/sales/?start=2025-01&end=2025-05")
            .add_header(API_KEY_HEADER, TEST_API_KEY)
            .await;
        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(warehouse.calls(), 4);
        assert_eq!(cache.sets(), 0);
    }

    #[tokio::test]
    async fn test_undecodable_rows_are_500_and_never_cached() {
        let warehouse = Arc::new(FakeWarehouse::returning(QueryOutput {
            total_records: None,
            rows: vec![RawRow::new(vec![Cell::Text("2025-01-01".into()), Cell::Null])],
        }));
        let cache = Arc::new(CountingCacheStore::new());
        let server = create_test_app(warehouse.clone(), cache.clone());

        let response = server
            .get("/api/v1/analytics/users/active?start=2025-01-01&end=2025-01-31")
            .add_header(API_KEY_HEADER, TEST_API_KEY)
            .await;

        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.json::<Value>()["kind"], "decode_failed");
        assert_eq!(cache.sets(), 0);
    }

    #[test_log::test(tokio::test)]
    async fn test_cache_outage_degrades_to_uncached_success() {
        let warehouse = Arc::new(FakeWarehouse::returning(active_users_rows()));
        let cache = Arc::new(FailingCacheStore::default());
        let server = create_test_app(warehouse.clone(), cache.clone());

        for _ in 0..2 {
            let response = server
                .get("/api/v1/analytics/users/active?start=2025-01-01&end=2025-01-31")
                .add_header(API_KEY_HEADER, TEST_API_KEY)
                .await;
            response.assert_status_ok();
            let body: Value = response.json();
            assert_eq!(
                body["data"]["active_users"],
                json!([
                    { "date": "2025-01-01", "active_users": 321 },
                    { "date": "2025-01-02", "active_users": 298 },
                ])
            );
        }

        // Both requests tried the cache (read and write) and both went to the warehouse
        assert_eq!(warehouse.calls(), 2);
        assert_eq!(cache.attempts.load(std::sync::atomic::Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_filters_partition_the_cache() {
        let warehouse = Arc::new(FakeWarehouse::returning(sales_rows()));
        let server = create_test_app(warehouse.clone(), Arc::new(MemoryCacheStore::new(100)));

        let get = |url: &'static str| {
            let server = &server;
            async move {
                server.get(url).add_header(API_KEY_HEADER, TEST_API_KEY).await.assert_status_ok();
            }
        };

        get("/api/v1/analytics/sales/?start=2025-01&end=2025-05").await;
        get("/api/v1/analytics/sales/?start=2025-01&end=2025-05&region=US").await;
        get("/api/v1/analytics/sales/?start=2025-01&end=2025-06").await;
        assert_eq!(warehouse.calls(), 3);

        // An empty filter is the same request as no filter; trailing slash makes no difference
        get("/api/v1/analytics/sales?start=2025-01&end=2025-05&region=").await;
        get("/api/v1/analytics/sales/?start=2025-01&end=2025-05&region=US").await;
        assert_eq!(warehouse.calls(), 3);
    }

    #[tokio::test]
    async fn test_pages_are_cached_separately() {
        let warehouse = Arc::new(FakeWarehouse::returning(revenue_rows(5)));
        let server = create_test_app(warehouse.clone(), Arc::new(MemoryCacheStore::new(100)));

        for (query, expected_calls) in [("page=1", 1), ("page=2", 2), ("page=1&page_size=2", 2), ("page=1&page_size=3", 3)] {
            server
                .get(&format!("/api/v1/analytics/revenue/?start=2025-01-01&end=2025-01-31&{query}"))
                .add_header(API_KEY_HEADER, TEST_API_KEY)
                .await
                .assert_status_ok();
            assert_eq!(warehouse.calls(), expected_calls, "after {query}");
        }
    }

    #[test]
    fn test_revenue_plan() {
        let tables = TablesConfig::default();
        let query = RevenueQuery {
            start: "2025-01-01".to_string(),
            end: "2025-01-31".to_string(),
            product: Some("WidgetA".to_string()),
            page: None,
            page_size: None,
        };
        let page = PageRequest { page: 3, page_size: 10 };

        let plan = Revenue::plan(&query, Some(page), &tables);

        let day = "to_char(date_trunc('day', dt_txt::date), 'YYYY-MM-DD')";
        let aggregate = format!(
            "SELECT {day} AS month, city_country AS product, SUM(humidity) AS total_revenue \
             FROM dev_bronze.ext_canada_weather WHERE {day} >= $1 AND {day} <= $2 AND city_country = $3 GROUP BY 1, 2"
        );
        assert_eq!(
            plan.rows.sql,
            format!("{aggregate} ORDER BY month, product LIMIT $4 OFFSET $5")
        );
        assert_eq!(
            plan.rows.params,
            vec![
                Param::Text("2025-01-01".into()),
                Param::Text("2025-01-31".into()),
                Param::Text("WidgetA".into()),
                Param::Int(10),
                Param::Int(20),
            ]
        );

        let count = plan.count.unwrap();
        assert_eq!(count.sql, format!("SELECT COUNT(*) FROM ({aggregate}) AS total_count"));
        assert_eq!(count.params, plan.rows.params[..3]);
    }

    #[test]
    fn test_revenue_plan_without_product() {
        let query = RevenueQuery {
            start: "2025-01-01".to_string(),
            end: "2025-01-31".to_string(),
            product: None,
            page: None,
            page_size: None,
        };
        let plan = Revenue::plan(&query, Some(PageRequest { page: 1, page_size: 2 }), &TablesConfig::default());

        assert!(!plan.rows.sql.contains("city_country ="));
        assert!(plan.rows.sql.ends_with("LIMIT $3 OFFSET $4"));
        assert_eq!(plan.count.unwrap().params.len(), 2);
    }

    #[test]
    fn test_sales_and_active_users_plans() {
        let tables = TablesConfig::default();

        let sales = Sales::plan(
            &SalesQuery {
                start: "2025-01".to_string(),
                end: "2025-05".to_string(),
                region: Some("US".to_string()),
            },
            None,
            &tables,
        );
        assert!(sales.count.is_none());
        assert_eq!(
            sales.rows.sql,
            "SELECT month, region, total, orders FROM monthly_sales \
             WHERE month::varchar >= $1 AND month::varchar <= $2 AND region = $3 ORDER BY month"
        );

        let users = ActiveUsers::plan(
            &ActiveUsersQuery {
                start: "2025-01-01".to_string(),
                end: "2025-01-31".to_string(),
            },
            None,
            &tables,
        );
        assert!(users.count.is_none());
        assert_eq!(
            users.rows.sql,
            "SELECT date, active_users FROM daily_active_users \
             WHERE date::varchar >= $1 AND date::varchar <= $2 ORDER BY date"
        );
        assert_eq!(users.rows.params.len(), 2);
    }

    #[test]
    fn test_cache_keys() {
        let revenue = RevenueQuery {
            start: "2025-01-01".to_string(),
            end: "2025-01-31".to_string(),
            product: None,
            page: None,
            page_size: None,
        };
        assert_eq!(
            Revenue::cache_key(&revenue, Some(PageRequest { page: 2, page_size: 5 })).to_string(),
            "revenue:2025-01-01:2025-01-31::2:5"
        );

        let sales = SalesQuery {
            start: "2025-01".to_string(),
            end: "2025-05".to_string(),
            region: Some("US".to_string()),
        };
        assert_eq!(Sales::cache_key(&sales, None).to_string(), "sales:2025-01:2025-05:US");

        let users = ActiveUsersQuery {
            start: "2025-01-01".to_string(),
            end: "2025-01-31".to_string(),
        };
        assert_eq!(
            ActiveUsers::cache_key(&users, None).to_string(),
            "users:active:2025-01-01:2025-01-31"
        );
    }
}
