// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Page arithmetic for newest-first reads.
//!
//! Pages are 1-based for callers; the store speaks `(limit, offset)`.

pub const DEFAULT_PAGE_SIZE: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageRequest {
    pub page: usize,
    pub page_size: usize,
}

impl PageRequest {
    /// Normalize raw caller input.
    ///
    /// A missing or non-positive page becomes page 1. A missing, non-positive
    /// or oversized page size falls back to [`DEFAULT_PAGE_SIZE`].
    pub fn sanitized(page: Option<i64>, page_size: Option<i64>, max_page_size: usize) -> Self {
        let page = match page {
            Some(p) if p >= 1 => p as usize,
            _ => 1,
        };
        let page_size = match page_size {
            Some(s) if s >= 1 && (s as u64) <= max_page_size as u64 => s as usize,
            _ => DEFAULT_PAGE_SIZE,
        };
        Self { page, page_size }
    }

    pub fn limit(&self) -> usize {
        self.page_size
    }

    pub fn offset(&self) -> usize {
        self.page.saturating_sub(1).saturating_mul(self.page_size)
    }
}

/// `ceil(total / page_size)`; zero when either side is zero.
pub fn total_pages(total: u64, page_size: usize) -> u64 {
    if page_size == 0 {
        return 0;
    }
    total.div_ceil(page_size as u64)
}
