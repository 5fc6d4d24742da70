use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

pub const DEFAULT_PAGE: i64 = 1;
pub const DEFAULT_LIMIT: i64 = 10;
pub const MAX_LIMIT: i64 = 50;

/// Quote record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct Quote {
    pub id: Uuid,
    pub text: String,
    pub author: Option<String>,
    pub uploader_id: Uuid,
    pub group_key: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewQuote {
    pub text: String,
    pub author: Option<String>,
    pub uploader_id: Uuid,
    pub group_key: String,
}

/// Which groups a query may look into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuoteScope {
    /// A single group.
    Group(String),
    /// Every group the user is a member of.
    MemberOf(Uuid),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteFilter {
    pub author: Option<String>,
    pub scope: QuoteScope,
    pub page: i64,
    pub limit: i64,
}

impl QuoteFilter {
    /// Out-of-range paging falls back to the defaults: page 1, limit 10.
    pub fn new(author: Option<String>, scope: QuoteScope, page: Option<i64>, limit: Option<i64>) -> Self {
        let page = page.filter(|p| *p >= 1).unwrap_or(DEFAULT_PAGE);
        let limit = limit
            .filter(|l| (1..=MAX_LIMIT).contains(l))
            .unwrap_or(DEFAULT_LIMIT);
        Self {
            author,
            scope,
            page,
            limit,
        }
    }

    /// Saturates instead of overflowing on absurd page numbers.
    pub fn offset(&self) -> i64 {
        self.page.saturating_sub(1).saturating_mul(self.limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(page: Option<i64>, limit: Option<i64>) -> QuoteFilter {
        QuoteFilter::new(None, QuoteScope::MemberOf(Uuid::nil()), page, limit)
    }

    #[test]
    fn page_zero_is_page_one() {
        assert_eq!(filter(Some(0), None), filter(Some(1), None));
        assert_eq!(filter(Some(-3), None).page, 1);
    }

    #[test]
    fn limits_out_of_range_clamp_to_default() {
        assert_eq!(filter(None, Some(999)).limit, 10);
        assert_eq!(filter(None, Some(0)).limit, 10);
        assert_eq!(filter(None, Some(51)).limit, 10);
        assert_eq!(filter(None, Some(50)).limit, 50);
        assert_eq!(filter(None, Some(1)).limit, 1);
        assert_eq!(filter(None, None).limit, 10);
    }

    #[test]
    fn offset_follows_page() {
        assert_eq!(filter(Some(1), Some(10)).offset(), 0);
        assert_eq!(filter(Some(3), Some(20)).offset(), 40);
    }

    #[test]
    fn huge_page_saturates_offset() {
        assert_eq!(filter(Some(i64::MAX), Some(10)).offset(), i64::MAX);
        assert_eq!(filter(Some(i64::MAX), Some(1)).offset(), i64::MAX - 1);
    }
}
