//! Request filters, result rows and response envelopes for the analytics endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, NoneAsEmptyString, serde_as};
use utoipa::{IntoParams, ToSchema};

use super::pagination::PageRequest;

/// Filters for the revenue endpoint.
///
/// `start` and `end` are compared as `YYYY-MM-DD` strings against the day-truncated timestamp,
/// inclusive at both ends. They are not parsed as dates.
#[serde_as]
#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RevenueQuery {
    /// First day to include, e.g. `2025-01-01`
    pub start: String,
    /// Last day to include, e.g. `2025-05-31`
    pub end: String,
    /// Only include this product; omitted or empty matches every product
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    #[param(value_type = Option<String>)]
    pub product: Option<String>,
    /// Page number, starting at 1
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[param(value_type = Option<i64>, default = 1, minimum = 1)]
    pub page: Option<i64>,
    /// Rows per page
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[param(value_type = Option<i64>, default = 2, minimum = 1, maximum = 100)]
    pub page_size: Option<i64>,
}

/// Filters for the sales endpoint
#[serde_as]
#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SalesQuery {
    /// First month to include, e.g. `2025-01`
    pub start: String,
    /// Last month to include, e.g. `2025-05`
    pub end: String,
    /// Only include this region; omitted or empty matches every region
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    #[param(value_type = Option<String>)]
    pub region: Option<String>,
}

/// Filters for the active users endpoint
#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ActiveUsersQuery {
    /// First day to include, e.g. `2025-01-01`
    pub start: String,
    /// Last day to include, e.g. `2025-05-31`
    pub end: String,
}

/// Revenue summed per day and product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RevenueRow {
    /// Day, formatted `YYYY-MM-DD`
    pub month: String,
    pub product: Option<String>,
    #[serde(deserialize_with = "coerce::float")]
    pub total_revenue: f64,
}

/// Monthly sales for one region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SalesRow {
    pub month: String,
    pub region: Option<String>,
    #[serde(deserialize_with = "coerce::float")]
    pub total: f64,
    #[serde(deserialize_with = "coerce::integer")]
    pub orders: i64,
}

/// Distinct active users on one day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ActiveUsersRow {
    pub date: String,
    #[serde(deserialize_with = "coerce::integer")]
    pub active_users: i64,
}

/// What is stored under a cache key: the shaped rows and, for paginated resources, the row
/// count behind them, so a cache hit can report the same metadata as a miss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedPayload<Row> {
    pub rows: Vec<Row>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "coerce::optional_integer")]
    pub total_records: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
}

/// Response metadata. Pagination fields are present only for paginated resources.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<i64>,
    /// Rows matching the filters across all pages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_records: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<i64>,
    /// When this response was built; cached results still get a fresh timestamp
    pub timestamp: DateTime<Utc>,
}

impl ResponseMeta {
    /// Metadata stamped now
    pub fn new(page: Option<PageRequest>, total_records: Option<i64>) -> Self {
        let (page, page_size, total_records, total_pages) = match page {
            Some(page) => {
                let total = total_records.unwrap_or(0);
                (Some(page.page), Some(page.page_size), Some(total), Some(page.total_pages(total)))
            }
            None => (None, None, None, None),
        };
        Self {
            page,
            page_size,
            total_records,
            total_pages,
            timestamp: Utc::now(),
        }
    }
}

/// Envelope shared by every analytics endpoint
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AnalyticsResponse<D> {
    pub status: ResponseStatus,
    pub data: D,
    pub meta: ResponseMeta,
}

impl<D> AnalyticsResponse<D> {
    pub fn success(data: D, meta: ResponseMeta) -> Self {
        Self {
            status: ResponseStatus::Success,
            data,
            meta,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RevenueData {
    pub revenue: Vec<RevenueRow>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SalesData {
    pub sales: Vec<SalesRow>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ActiveUsersData {
    pub active_users: Vec<ActiveUsersRow>,
}

/// Lenient numeric deserializers, so rows read back from the cache come out with the same
/// numeric types regardless of how the number was written.
mod coerce {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Number {
        Int(i64),
        Float(f64),
        Text(String),
    }

    pub fn float<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Number::deserialize(deserializer)? {
            Number::Int(i) => Ok(i as f64),
            Number::Float(f) => Ok(f),
            Number::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| D::Error::custom(format!("'{s}' is not a number"))),
        }
    }

    pub fn integer<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        match Number::deserialize(deserializer)? {
            Number::Int(i) => Ok(i),
            Number::Float(f) if f.is_finite() && f.fract() == 0.0 => Ok(f as i64),
            Number::Float(f) => Err(D::Error::custom(format!("{f} is not an integer"))),
            Number::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| D::Error::custom(format!("'{s}' is not an integer"))),
        }
    }

    pub fn optional_integer<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
        #[derive(Deserialize)]
        struct Wrapped(#[serde(deserialize_with = "integer")] i64);

        Ok(Option::<Wrapped>::deserialize(deserializer)?.map(|Wrapped(i)| i))
    }
}
