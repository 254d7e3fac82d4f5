//! Page-number pagination for paginated analytics resources.
//!
//! Requests carry `page` (1-based) and `page_size`. Both are validated at the boundary against
//! [`PaginationConfig`]: out-of-range values are rejected with a 400 rather than clamped, so the
//! page a client asked for is always the page it gets (or an error). A page past the end is not
//! an error; it simply comes back empty.

use crate::config::PaginationConfig;
use crate::errors::Error;

/// A validated page request: `page >= 1`, `1 <= page_size <= max_page_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: i64,
    pub page_size: i64,
}

impl PageRequest {
    /// Apply defaults (page 1, the configured page size) and bounds.
    pub fn resolve(page: Option<i64>, page_size: Option<i64>, config: &PaginationConfig) -> Result<Self, Error> {
        let page = page.unwrap_or(1);
        if page < 1 {
            return Err(Error::BadRequest {
                message: format!("page must be at least 1, got {page}"),
            });
        }

        let page_size = page_size.unwrap_or(config.default_page_size);
        if !(1..=config.max_page_size).contains(&page_size) {
            return Err(Error::BadRequest {
                message: format!("page_size must be between 1 and {}, got {page_size}", config.max_page_size),
            });
        }

        Ok(Self { page, page_size })
    }

    /// Rows to skip before this page
    #[inline]
    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.page_size)
    }

    /// Pages needed to hold `total_records` rows at this page size
    #[inline]
    pub fn total_pages(&self, total_records: i64) -> i64 {
        total_pages(total_records, self.page_size)
    }
}

/// `ceil(total_records / page_size)`, with zero records (or a degenerate page size) giving zero
/// pages.
pub fn total_pages(total_records: i64, page_size: i64) -> i64 {
    if total_records <= 0 || page_size <= 0 {
        return 0;
    }
    total_records / page_size + i64::from(total_records % page_size != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PaginationConfig {
        PaginationConfig {
            default_page_size: 2,
            max_page_size: 100,
        }
    }

    #[test]
    fn test_defaults() {
        let page = PageRequest::resolve(None, None, &config()).unwrap();
        assert_eq!(page, PageRequest { page: 1, page_size: 2 });
        assert_eq!(page.offset(), 0);
    }

    #[test]
    fn test_offset() {
        let page = PageRequest::resolve(Some(3), Some(10), &config()).unwrap();
        assert_eq!(page.offset(), 20);

        let page = PageRequest::resolve(Some(1), Some(100), &config()).unwrap();
        assert_eq!(page.offset(), 0);

        // Huge page numbers saturate instead of overflowing
        let page = PageRequest::resolve(Some(i64::MAX), Some(100), &config()).unwrap();
        assert_eq!(page.offset(), i64::MAX);
    }

    #[test]
    fn test_total_pages() {
        assert_eq!(total_pages(5, 2), 3);
        assert_eq!(total_pages(4, 2), 2);
        assert_eq!(total_pages(1, 100), 1);
        assert_eq!(total_pages(0, 10), 0);
        assert_eq!(total_pages(i64::MAX, 1), i64::MAX);
        assert_eq!(total_pages(i64::MAX, 2), i64::MAX / 2 + 1);

        for total in 0..50 {
            for size in 1..12 {
                let expected = (total as f64 / size as f64).ceil() as i64;
                assert_eq!(total_pages(total, size), expected, "total={total} size={size}");
            }
        }
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        assert!(matches!(
            PageRequest::resolve(Some(0), None, &config()),
            Err(Error::BadRequest { .. })
        ));
        assert!(matches!(
            PageRequest::resolve(Some(-1), None, &config()),
            Err(Error::BadRequest { .. })
        ));
        assert!(matches!(
            PageRequest::resolve(None, Some(0), &config()),
            Err(Error::BadRequest { .. })
        ));
        assert!(matches!(
            PageRequest::resolve(None, Some(101), &config()),
            Err(Error::BadRequest { .. })
        ));
        assert!(PageRequest::resolve(None, Some(100), &config()).is_ok());
    }

    #[test]
    fn test_page_beyond_total_is_accepted() {
        let page = PageRequest::resolve(Some(50), Some(10), &config()).unwrap();
        assert_eq!(page.offset(), 490);
        assert_eq!(page.total_pages(7), 1);
    }
}
