// ABOUTME: Offset and cursor pagination shared by all list endpoints
// ABOUTME: Keyset cursors encode (created_at, id) with an id tie-break
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

//! # Pagination
//!
//! List APIs pick a strategy automatically: offset-based below the configured
//! row threshold, cursor-based (keyset on `(created_at, id)` descending)
//! above it. Callers may pin a strategy explicitly. Either way the response
//! envelope is the same:
//!
//! ```json
//! {"data": [...], "pagination": {"page":1,"size":50,"total":123,"total_pages":3},
//!  "links": {"first":"?page=1","prev":null,"next":"?page=2","last":"?page=3"}}
//! ```

use crate::errors::{AppError, AppResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pagination strategy selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaginationStrategy {
    /// OFFSET/LIMIT; exact totals, degrades on deep pages
    Offset,
    /// Keyset on `(created_at, id)`; stable under concurrent inserts
    Cursor,
}

/// Parsed pagination inputs from a list request
#[derive(Debug, Clone)]
pub struct PageParams {
    /// 1-based page number (offset strategy)
    pub page: u64,
    /// Page size after clamping
    pub size: u64,
    /// Opaque cursor (cursor strategy)
    pub cursor: Option<Cursor>,
    /// Caller-pinned strategy, when any
    pub strategy: Option<PaginationStrategy>,
}

impl PageParams {
    /// Normalize raw query inputs, clamping the size to the configured cap
    #[must_use]
    pub fn normalize(
        page: Option<u64>,
        size: Option<u64>,
        cursor: Option<Cursor>,
        strategy: Option<PaginationStrategy>,
        default_size: u64,
        max_size: u64,
    ) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            size: size.unwrap_or(default_size).clamp(1, max_size),
            cursor,
            strategy,
        }
    }

    /// Pick the effective strategy for a collection of `total` rows
    #[must_use]
    pub fn effective_strategy(&self, total: u64, cursor_threshold: u64) -> PaginationStrategy {
        self.strategy.unwrap_or({
            if total >= cursor_threshold {
                PaginationStrategy::Cursor
            } else {
                PaginationStrategy::Offset
            }
        })
    }

    /// SQL offset for the offset strategy
    #[must_use]
    pub const fn offset(&self) -> u64 {
        (self.page - 1) * self.size
    }
}

/// Keyset cursor over `(created_at, id)` descending
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    /// Sort key of the last row on the previous page
    pub created_at: DateTime<Utc>,
    /// Tie-break id of that row
    pub id: String,
}

impl Cursor {
    /// Build a cursor for the row that ended the previous page
    #[must_use]
    pub fn new(created_at: DateTime<Utc>, id: impl Into<String>) -> Self {
        Self {
            created_at,
            id: id.into(),
        }
    }

    /// Opaque wire form
    #[must_use]
    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(format!("{}|{}", self.created_at.to_rfc3339(), self.id))
    }

    /// Parse the wire form
    ///
    /// # Errors
    /// Returns `InvalidRequest` if the cursor is malformed.
    pub fn decode(encoded: &str) -> AppResult<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| AppError::invalid_input("Invalid cursor"))?;
        let text =
            String::from_utf8(bytes).map_err(|_| AppError::invalid_input("Invalid cursor"))?;
        let (ts, id) = text
            .split_once('|')
            .ok_or_else(|| AppError::invalid_input("Invalid cursor"))?;
        let created_at = DateTime::parse_from_rfc3339(ts)
            .map_err(|_| AppError::invalid_input("Invalid cursor timestamp"))?
            .with_timezone(&Utc);
        if id.is_empty() {
            return Err(AppError::invalid_input("Invalid cursor id"));
        }
        Ok(Self {
            created_at,
            id: id.to_owned(),
        })
    }
}

/// Page counters in the response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageInfo {
    /// 1-based page number
    pub page: u64,
    /// Page size
    pub size: u64,
    /// Total matching rows
    pub total: u64,
    /// Total pages at this size
    pub total_pages: u64,
}

/// Relative navigation links
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageLinks {
    /// First page
    pub first: Option<String>,
    /// Previous page, when any
    pub prev: Option<String>,
    /// Next page, when any
    pub next: Option<String>,
    /// Last page
    pub last: Option<String>,
}

/// The list response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    /// Page contents
    pub data: Vec<T>,
    /// Counters
    pub pagination: PageInfo,
    /// Navigation
    pub links: PageLinks,
    /// Cursor for the next page (cursor strategy only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    /// Assemble an offset-strategy page with navigation links rooted at `path`
    #[must_use]
    pub fn offset(data: Vec<T>, params: &PageParams, total: u64, path: &str) -> Self {
        let total_pages = if total == 0 {
            0
        } else {
            total.div_ceil(params.size)
        };
        let link = |page: u64| format!("{path}?page={page}&size={}", params.size);
        let links = PageLinks {
            first: (total_pages > 0).then(|| link(1)),
            prev: (params.page > 1 && total_pages > 0).then(|| link(params.page - 1)),
            next: (params.page < total_pages).then(|| link(params.page + 1)),
            last: (total_pages > 0).then(|| link(total_pages)),
        };
        Self {
            data,
            pagination: PageInfo {
                page: params.page,
                size: params.size,
                total,
                total_pages,
            },
            links,
            next_cursor: None,
        }
    }

    /// Assemble a cursor-strategy page. `next_cursor` is present when more
    /// rows follow.
    #[must_use]
    pub fn cursor(
        data: Vec<T>,
        params: &PageParams,
        total: u64,
        next: Option<Cursor>,
        path: &str,
    ) -> Self {
        let total_pages = if total == 0 {
            0
        } else {
            total.div_ceil(params.size)
        };
        let next_cursor = next.map(|c| c.encode());
        let links = PageLinks {
            first: Some(format!("{path}?size={}", params.size)),
            prev: None,
            next: next_cursor
                .as_ref()
                .map(|c| format!("{path}?cursor={c}&size={}", params.size)),
            last: None,
        };
        Self {
            data,
            pagination: PageInfo {
                page: 1,
                size: params.size,
                total,
                total_pages,
            },
            links,
            next_cursor,
        }
    }

    /// Map the payload type, keeping the envelope
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            data: self.data.into_iter().map(f).collect(),
            pagination: self.pagination,
            links: self.links,
            next_cursor: self.next_cursor,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn cursor_round_trip() {
        let cursor = Cursor::new(Utc::now(), "row-42");
        let decoded = Cursor::decode(&cursor.encode()).unwrap();
        assert_eq!(decoded.id, "row-42");
        assert_eq!(
            decoded.created_at.timestamp_micros(),
            cursor.created_at.timestamp_micros()
        );
    }

    #[test]
    fn cursor_rejects_garbage() {
        assert!(Cursor::decode("not-base64!").is_err());
        assert!(Cursor::decode(&URL_SAFE_NO_PAD.encode("missing-separator")).is_err());
    }

    #[test]
    fn strategy_selection_by_threshold() {
        let params = PageParams::normalize(None, None, None, None, 50, 500);
        assert_eq!(
            params.effective_strategy(100, 10_000),
            PaginationStrategy::Offset
        );
        assert_eq!(
            params.effective_strategy(20_000, 10_000),
            PaginationStrategy::Cursor
        );
        // Pinned strategy wins
        let pinned =
            PageParams::normalize(None, None, None, Some(PaginationStrategy::Cursor), 50, 500);
        assert_eq!(
            pinned.effective_strategy(100, 10_000),
            PaginationStrategy::Cursor
        );
    }

    #[test]
    fn size_is_clamped() {
        let params = PageParams::normalize(Some(0), Some(9_999), None, None, 50, 500);
        assert_eq!(params.page, 1);
        assert_eq!(params.size, 500);
    }

    #[test]
    fn offset_links() {
        let params = PageParams::normalize(Some(2), Some(10), None, None, 50, 500);
        let page = Page::offset(vec![1, 2, 3], &params, 25, "/tools");
        assert_eq!(page.pagination.total_pages, 3);
        assert_eq!(page.links.prev.as_deref(), Some("/tools?page=1&size=10"));
        assert_eq!(page.links.next.as_deref(), Some("/tools?page=3&size=10"));
        assert_eq!(page.links.last.as_deref(), Some("/tools?page=3&size=10"));
    }

    #[test]
    fn empty_collection_has_no_links() {
        let params = PageParams::normalize(None, None, None, None, 50, 500);
        let page: Page<i32> = Page::offset(Vec::new(), &params, 0, "/tools");
        assert_eq!(page.pagination.total_pages, 0);
        assert!(page.links.first.is_none());
        assert!(page.links.next.is_none());
    }
}
