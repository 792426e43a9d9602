//! Pagination arithmetic
//!
//! Pages are 1-based. `offset = (page_num - 1) * page_size`; a page result
//! reports the unfiltered total and `ceil(total / page_size)` pages.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default page size when none is given
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Translate a page request into `(offset, limit)`
///
/// Fails with [`Error::InvalidArgument`] if either value is below 1.
pub fn paginate(page_num: u32, page_size: u32) -> Result<(u64, u64)> {
    if page_num < 1 {
        return Err(Error::invalid(format!("page number must be at least 1, got {}", page_num)));
    }
    if page_size < 1 {
        return Err(Error::invalid(format!("page size must be at least 1, got {}", page_size)));
    }
    let offset = (u64::from(page_num) - 1) * u64::from(page_size);
    Ok((offset, u64::from(page_size)))
}

/// A validated page request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PageRequest {
    page_num: u32,
    page_size: u32,
}

impl PageRequest {
    /// Validate and build a request
    pub fn new(page_num: u32, page_size: u32) -> Result<Self> {
        paginate(page_num, page_size)?;
        Ok(Self { page_num, page_size })
    }

    /// 1-based page number
    pub fn page_num(&self) -> u32 {
        self.page_num
    }

    /// Rows per page
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Rows skipped before this page
    pub fn offset(&self) -> u64 {
        (u64::from(self.page_num) - 1) * u64::from(self.page_size)
    }

    /// `(offset, limit)` for the store
    pub fn window(&self) -> (u64, u64) {
        (self.offset(), u64::from(self.page_size))
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page_num: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// One page of rows plus navigation metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult<T> {
    /// Rows on this page, at most `page_size`
    pub data: Vec<T>,
    /// Count of all rows, not just this page
    pub total: u64,
    /// 1-based page number
    pub page_num: u32,
    /// Requested page size
    pub page_size: u32,
    /// `ceil(total / page_size)`, 0 when there are no rows
    pub total_pages: u64,
    /// A later page exists
    pub has_next: bool,
    /// An earlier page exists
    pub has_previous: bool,
}

impl<T> PageResult<T> {
    /// Convert the rows, keeping the metadata
    pub fn map<U, F>(self, f: F) -> PageResult<U>
    where
        F: FnMut(T) -> U,
    {
        PageResult {
            data: self.data.into_iter().map(f).collect(),
            total: self.total,
            page_num: self.page_num,
            page_size: self.page_size,
            total_pages: self.total_pages,
            has_next: self.has_next,
            has_previous: self.has_previous,
        }
    }

    /// Number of rows on this page
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when this page holds no rows
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Assemble a page result from a fetched page and the total row count
///
/// With `total == 0` there are no pages and both navigation flags are false,
/// whatever the requested page number.
pub fn build_page_result<T>(data: Vec<T>, total: u64, request: PageRequest) -> PageResult<T> {
    let page_num = request.page_num();
    let page_size = request.page_size();

    let (total_pages, has_next, has_previous) = if total == 0 {
        (0, false, false)
    } else {
        let pages = total.div_ceil(u64::from(page_size));
        (pages, u64::from(page_num) < pages, page_num > 1)
    };

    PageResult {
        data,
        total,
        page_num,
        page_size,
        total_pages,
        has_next,
        has_previous,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_paginate_offsets() {
        assert_eq!(paginate(1, 5).unwrap(), (0, 5));
        assert_eq!(paginate(3, 5).unwrap(), (10, 5));
        assert_eq!(paginate(u32::MAX, u32::MAX).unwrap().0, (u64::from(u32::MAX) - 1) * u64::from(u32::MAX));
    }

    #[test]
    fn test_paginate_rejects_zero() {
        assert!(matches!(paginate(0, 5), Err(Error::InvalidArgument(_))));
        assert!(matches!(paginate(1, 0), Err(Error::InvalidArgument(_))));
        assert!(PageRequest::new(0, 10).is_err());
    }

    #[test]
    fn test_default_request() {
        let request = PageRequest::default();
        assert_eq!(request.page_num(), 1);
        assert_eq!(request.page_size(), 10);
        assert_eq!(request.window(), (0, 10));
    }

    #[test]
    fn test_first_and_last_page_of_fifteen() {
        let first = build_page_result(vec![0; 5], 15, PageRequest::new(1, 5).unwrap());
        assert_eq!(first.len(), 5);
        assert_eq!(first.total, 15);
        assert_eq!(first.total_pages, 3);
        assert!(first.has_next);
        assert!(!first.has_previous);

        let last = build_page_result(vec![0; 5], 15, PageRequest::new(3, 5).unwrap());
        assert!(!last.has_next);
        assert!(last.has_previous);
    }

    #[test]
    fn test_empty_total_has_no_navigation() {
        let page = build_page_result(Vec::<u8>::new(), 0, PageRequest::new(4, 5).unwrap());
        assert_eq!(page.total_pages, 0);
        assert!(!page.has_next);
        assert!(!page.has_previous);
        assert!(page.is_empty());
    }

    #[test]
    fn test_map_keeps_metadata() {
        let page = build_page_result(vec![1, 2], 12, PageRequest::new(2, 2).unwrap());
        let mapped = page.map(|n| n.to_string());
        assert_eq!(mapped.data, vec!["1", "2"]);
        assert_eq!(mapped.total_pages, 6);
        assert!(mapped.has_next && mapped.has_previous);
    }

    proptest! {
        #[test]
        fn prop_page_metadata(page_num in 1u32..500, page_size in 1u32..200, total in 0u64..100_000) {
            let request = PageRequest::new(page_num, page_size).unwrap();
            let page = build_page_result(Vec::<()>::new(), total, request);

            let expected_pages = (total + u64::from(page_size) - 1) / u64::from(page_size);
            prop_assert_eq!(page.total_pages, expected_pages);
            if total == 0 {
                prop_assert!(!page.has_next && !page.has_previous);
            } else {
                prop_assert_eq!(page.has_next, u64::from(page_num) < expected_pages);
                prop_assert_eq!(page.has_previous, page_num > 1);
            }
        }

        #[test]
        fn prop_offset_matches_window(page_num in 1u32..10_000, page_size in 1u32..10_000) {
            let (offset, limit) = paginate(page_num, page_size).unwrap();
            prop_assert_eq!(offset, u64::from(page_num - 1) * u64::from(page_size));
            prop_assert_eq!(limit, u64::from(page_size));
            prop_assert_eq!(PageRequest::new(page_num, page_size).unwrap().window(), (offset, limit));
        }
    }
}
