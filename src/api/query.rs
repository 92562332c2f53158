//! Query parameter structs for pagination and list filters

use serde::{Deserialize, Deserializer, Serialize};
use std::str::FromStr;
use uuid::Uuid;

pub const DEFAULT_PAGE_LIMIT: usize = 50;
pub const MAX_PAGE_LIMIT: usize = 100;

/// Deserialize a number from a query string value (always a string on the wire)
fn deserialize_from_str<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr + Default,
    T::Err: std::fmt::Display,
{
    use serde::de::Error;
    let s: Option<String> = Option::deserialize(deserializer)?;
    match s {
        Some(s) if !s.is_empty() => s.parse().map_err(D::Error::custom),
        _ => Ok(T::default()),
    }
}

fn deserialize_limit<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    let s: Option<String> = Option::deserialize(deserializer)?;
    match s {
        Some(s) if !s.is_empty() => s.parse().map_err(D::Error::custom),
        _ => Ok(DEFAULT_PAGE_LIMIT),
    }
}

/// Empty strings are treated as absent so `?topic=` means "no filter"
fn deserialize_non_empty<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    use serde::de::Error;
    let s: Option<String> = Option::deserialize(deserializer)?;
    match s {
        Some(s) if !s.trim().is_empty() => s.trim().parse().map(Some).map_err(D::Error::custom),
        _ => Ok(None),
    }
}

/// Pagination parameters for list endpoints
#[derive(Debug, Deserialize, Clone)]
pub struct PaginationParams {
    /// Max items to return (default: 50, max: 100)
    #[serde(default = "default_limit", deserialize_with = "deserialize_limit")]
    pub limit: usize,
    #[serde(default, deserialize_with = "deserialize_from_str")]
    pub offset: usize,
}

fn default_limit() -> usize {
    DEFAULT_PAGE_LIMIT
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

impl PaginationParams {
    pub fn validate(&self) -> Result<(), String> {
        if self.limit == 0 {
            return Err("limit must be at least 1".to_string());
        }
        if self.limit > MAX_PAGE_LIMIT {
            return Err(format!("limit cannot exceed {}", MAX_PAGE_LIMIT));
        }
        Ok(())
    }

    /// Limit clamped to `1..=100`
    pub fn validated_limit(&self) -> usize {
        self.limit.clamp(1, MAX_PAGE_LIMIT)
    }
}

/// `GET /articles` query
#[derive(Debug, Deserialize, Default, Clone)]
pub struct ArticleQuery {
    #[serde(flatten)]
    pub pagination: PaginationParams,
    #[serde(default, deserialize_with = "deserialize_non_empty")]
    pub topic: Option<String>,
    #[serde(default, deserialize_with = "deserialize_non_empty")]
    pub feed_id: Option<Uuid>,
    #[serde(default, deserialize_with = "deserialize_non_empty")]
    pub search: Option<String>,
}

impl ArticleQuery {
    pub fn filter(&self) -> crate::store::ArticleFilter {
        crate::store::ArticleFilter {
            topic: self.topic.clone(),
            feed_id: self.feed_id,
            search: self.search.clone(),
        }
    }
}

/// Paginated response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    /// Total count of items matching the filter
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    pub has_more: bool,
}

impl<T> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, total: usize, limit: usize, offset: usize) -> Self {
        Self {
            has_more: offset + items.len() < total,
            items,
            total,
            limit,
            offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_defaults() {
        let params = PaginationParams::default();
        assert_eq!(params.limit, 50);
        assert_eq!(params.offset, 0);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_pagination_limit_bounds() {
        let params = PaginationParams {
            limit: 150,
            offset: 0,
        };
        assert!(params.validate().unwrap_err().contains("limit"));
        assert_eq!(params.validated_limit(), 100);

        let params = PaginationParams {
            limit: 0,
            offset: 0,
        };
        assert!(params.validate().is_err());
        assert_eq!(params.validated_limit(), 1);
    }

    #[test]
    fn test_pagination_from_query_string() {
        let params: PaginationParams = parse_query("limit=20&offset=40");
        assert_eq!(params.limit, 20);
        assert_eq!(params.offset, 40);

        let params: PaginationParams = parse_query("");
        assert_eq!(params.limit, 50);
    }

    #[test]
    fn test_article_query_filters() {
        let feed = Uuid::new_v4();
        let query: ArticleQuery =
            parse_query(&format!("topic=Markets&feed_id={}&search=&limit=5", feed));
        assert_eq!(query.topic.as_deref(), Some("Markets"));
        assert_eq!(query.feed_id, Some(feed));
        assert!(query.search.is_none());
        assert_eq!(query.pagination.limit, 5);
        assert_eq!(query.filter().topic.as_deref(), Some("Markets"));
    }

    #[test]
    fn test_article_query_rejects_bad_feed_id() {
        let result: Result<axum::extract::Query<ArticleQuery>, _> =
            axum::extract::Query::try_from_uri(&"/articles?feed_id=nope".parse().unwrap());
        assert!(result.is_err());
    }

    #[test]
    fn test_paginated_response_has_more() {
        let page = PaginatedResponse::new(vec![1, 2], 5, 2, 0);
        assert!(page.has_more);
        let page = PaginatedResponse::new(vec![5], 5, 2, 4);
        assert!(!page.has_more);
    }

    fn parse_query<T: serde::de::DeserializeOwned>(qs: &str) -> T {
        let uri: axum::http::Uri = format!("/x?{}", qs).parse().unwrap();
        axum::extract::Query::<T>::try_from_uri(&uri).unwrap().0
    }
}
