//! Warehouse gateway over the PostgreSQL wire protocol (Redshift speaks it too).

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgRow, PgSslMode};
use sqlx::query::{Query, QueryScalar};
use sqlx::{Column, Connection, PgConnection, Postgres, Row, TypeInfo, ValueRef};
use tracing::{debug, instrument, warn};

use super::{Cell, Param, QueryOutput, QueryPlan, RawRow, Result, Statement, Warehouse, WarehouseError};
use crate::config::{SslMode, WarehouseConfig};

const APPLICATION_NAME: &str = "analytics-api";

/// Opens a fresh connection per [`QueryPlan`] and closes it once the plan finishes, whether it
/// succeeded or not.
#[derive(Clone)]
pub struct PgWarehouse {
    options: PgConnectOptions,
}

impl PgWarehouse {
    pub fn new(config: &WarehouseConfig) -> Self {
        let ssl_mode = match config.ssl_mode {
            SslMode::Disable => PgSslMode::Disable,
            SslMode::Prefer => PgSslMode::Prefer,
            SslMode::Require => PgSslMode::Require,
        };
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.user)
            .password(&config.password)
            .ssl_mode(ssl_mode);
        Self::with_options(options)
    }

    /// Gateway over explicit connection options. Sessions are tagged with the
    /// `analytics-api` application name.
    pub fn with_options(options: PgConnectOptions) -> Self {
        Self {
            options: options.application_name(APPLICATION_NAME),
        }
    }

    async fn connect(&self) -> Result<PgConnection> {
        // Authentication failures come back as database errors; from the caller's point of view
        // they are still "could not get a connection".
        PgConnection::connect_with(&self.options)
            .await
            .map_err(|e| WarehouseError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl Warehouse for PgWarehouse {
    #[instrument(skip_all, fields(paginated = plan.count.is_some()), err)]
    async fn execute(&self, plan: &QueryPlan) -> Result<QueryOutput> {
        let mut conn = self.connect().await?;
        let result = run_plan(&mut conn, plan).await;

        if let Err(e) = conn.close().await {
            warn!("Failed to close warehouse connection cleanly: {}", e);
        }

        result
    }
}

async fn run_plan(conn: &mut PgConnection, plan: &QueryPlan) -> Result<QueryOutput> {
    let total_records = match &plan.count {
        Some(count) => {
            debug!(sql = %count.sql, "Executing count statement");
            Some(bind_scalar(count).fetch_one(&mut *conn).await?)
        }
        None => None,
    };

    debug!(sql = %plan.rows.sql, "Executing row statement");
    let rows = bind_query(&plan.rows).fetch_all(&mut *conn).await?;
    let rows = rows.iter().map(decode_row).collect::<Result<Vec<_>>>()?;

    Ok(QueryOutput { total_records, rows })
}

fn bind_query(statement: &Statement) -> Query<'_, Postgres, PgArguments> {
    statement.params.iter().fold(sqlx::query(&statement.sql), |query, param| match param {
        Param::Text(s) => query.bind(s.as_str()),
        Param::Int(i) => query.bind(*i),
    })
}

fn bind_scalar(statement: &Statement) -> QueryScalar<'_, Postgres, i64, PgArguments> {
    statement
        .params
        .iter()
        .fold(sqlx::query_scalar(&statement.sql), |query, param| match param {
            Param::Text(s) => query.bind(s.as_str()),
            Param::Int(i) => query.bind(*i),
        })
}

fn decode_row(row: &PgRow) -> Result<RawRow> {
    row.columns()
        .iter()
        .map(|column| decode_cell(row, column.ordinal(), column.type_info().name()))
        .collect::<Result<Vec<_>>>()
        .map(RawRow::new)
}

/// Read one column into a [`Cell`], normalising the warehouse's native numeric and temporal
/// types so the shaping code only ever sees integers, floats and text.
fn decode_cell(row: &PgRow, index: usize, type_name: &str) -> Result<Cell> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(Cell::Null);
    }

    let cell = match type_name {
        "INT2" => Cell::Int(row.try_get::<i16, _>(index)?.into()),
        "INT4" => Cell::Int(row.try_get::<i32, _>(index)?.into()),
        "INT8" => Cell::Int(row.try_get::<i64, _>(index)?),
        "FLOAT4" => Cell::Float(row.try_get::<f32, _>(index)?.into()),
        "FLOAT8" => Cell::Float(row.try_get::<f64, _>(index)?),
        "NUMERIC" => {
            let value: Decimal = row.try_get(index)?;
            Cell::Float(
                value
                    .to_f64()
                    .ok_or_else(|| WarehouseError::Decode(format!("column {index}: {value} does not fit in a float")))?,
            )
        }
        "DATE" => Cell::Text(row.try_get::<NaiveDate, _>(index)?.to_string()),
        "TIMESTAMP" => Cell::Text(row.try_get::<NaiveDateTime, _>(index)?.to_string()),
        "TIMESTAMPTZ" => Cell::Text(row.try_get::<DateTime<Utc>, _>(index)?.to_rfc3339()),
        "BOOL" => Cell::Text(row.try_get::<bool, _>(index)?.to_string()),
        _ => Cell::Text(row.try_get::<String, _>(index)?),
    };
    Ok(cell)
}
