// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_LIMIT: u32 = 20;
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Normalized page request. Construct with [`Page::new`] so bounds always hold:
/// `page >= 1` and `1 <= limit <= 100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    page: u32,
    limit: u32,
}

impl Page {
    /// `page` below 1 becomes 1; a zero `limit` takes the default, anything
    /// above the maximum is clamped.
    pub fn new(page: u32, limit: u32) -> Self {
        let limit = match limit {
            0 => DEFAULT_PAGE_LIMIT,
            l => l.min(MAX_PAGE_LIMIT),
        };
        Self {
            page: page.max(1),
            limit,
        }
    }

    /// Largest page, used when walking every page of a result set.
    pub fn max(page: u32) -> Self {
        Self::new(page, MAX_PAGE_LIMIT)
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn offset(&self) -> usize {
        (self.page as usize - 1) * self.limit as usize
    }

    /// Slice an already sorted, fully materialized result.
    pub fn apply<T>(&self, items: Vec<T>) -> Paged<T> {
        let total = items.len();
        let items = items
            .into_iter()
            .skip(self.offset())
            .take(self.limit as usize)
            .collect();
        Paged {
            items,
            total,
            page: self.page,
            limit: self.limit,
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(1, DEFAULT_PAGE_LIMIT)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: u32,
    pub limit: u32,
}

impl<T> Paged<T> {
    pub fn has_more(&self) -> bool {
        (self.page as usize) * (self.limit as usize) < self.total
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paged<U> {
        Paged {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            limit: self.limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_are_normalized() {
        assert_eq!(Page::new(0, 0), Page::new(1, 20));
        assert_eq!(Page::new(3, 500).limit(), 100);
        assert_eq!(Page::new(2, 1).limit(), 1);
        assert_eq!(Page::new(0, 10).page(), 1);
    }

    #[test]
    fn test_apply_slices_and_reports_total() {
        let page = Page::new(2, 3).apply((1..=7).collect::<Vec<_>>());
        assert_eq!(page.items, vec![4, 5, 6]);
        assert_eq!(page.total, 7);
        assert!(page.has_more());

        let last = Page::new(3, 3).apply((1..=7).collect::<Vec<_>>());
        assert_eq!(last.items, vec![7]);
        assert!(!last.has_more());

        let beyond = Page::new(9, 3).apply((1..=7).collect::<Vec<_>>());
        assert!(beyond.items.is_empty());
    }
}
