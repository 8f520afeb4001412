//! Pages of query results.
//!
//! [`PaginationParams`] selects a 1-indexed page; [`Page`] carries one page of items with the
//! total match count and navigation links.

use serde::{Deserialize, Serialize};

/// One page of results.
///
/// ```ignore
/// let page = store
///     .model("users")?
///     .query()
///     .sort_by("name", SortDirection::Asc)
///     .paginate(2, 10)
///     .execute_page()
///     .await?;
///
/// assert_eq!(page.previous_page, Some(1));
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Number of documents matching the query across all pages.
    pub count: usize,
    pub next_page: Option<usize>,
    pub previous_page: Option<usize>,
}

impl<T> Page<T> {
    pub fn builder(items: Vec<T>) -> PageBuilder<T> {
        PageBuilder::new(items)
    }

    /// Builds a page of `items` fetched with `params`, out of `count` total matches.
    pub fn from_params(items: Vec<T>, count: usize, params: &PaginationParams) -> Self {
        let seen = params.offset() + items.len();

        Page::builder(items)
            .with_count(count)
            .with_next_page((seen < count).then(|| params.page + 1))
            .with_previous_page((params.page > 1).then(|| params.page - 1))
            .build()
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            count: self.count,
            next_page: self.next_page,
            previous_page: self.previous_page,
        }
    }
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            count: 0,
            next_page: None,
            previous_page: None,
        }
    }
}

pub struct PageBuilder<T> {
    items: Vec<T>,
    count: usize,
    next_page: Option<usize>,
    previous_page: Option<usize>,
}

impl<T> PageBuilder<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            count: 0,
            next_page: None,
            previous_page: None,
        }
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    pub fn with_next_page(mut self, next_page: Option<usize>) -> Self {
        self.next_page = next_page;
        self
    }

    pub fn with_previous_page(mut self, previous_page: Option<usize>) -> Self {
        self.previous_page = previous_page;
        self
    }

    pub fn build(self) -> Page<T> {
        Page {
            items: self.items,
            count: self.count,
            next_page: self.next_page,
            previous_page: self.previous_page,
        }
    }
}

/// A 1-indexed page number and page size.
///
/// Page numbers below 1 are treated as the first page.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationParams {
    pub page: usize,
    pub per_page: usize,
}

impl PaginationParams {
    pub fn new(page: usize, per_page: usize) -> Self {
        Self {
            page: page.max(1),
            per_page,
        }
    }

    /// Number of documents to skip before this page.
    pub fn offset(&self) -> usize {
        self.page.saturating_sub(1) * self.per_page
    }
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self { page: 1, per_page: 10 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_is_zero_based() {
        assert_eq!(PaginationParams::new(1, 10).offset(), 0);
        assert_eq!(PaginationParams::new(3, 20).offset(), 40);
        assert_eq!(PaginationParams::new(0, 20).offset(), 0);
    }

    #[test]
    fn page_links_follow_count() {
        let params = PaginationParams::new(2, 10);
        let page = Page::from_params((11..=20).collect::<Vec<_>>(), 25, &params);

        assert_eq!(page.next_page, Some(3));
        assert_eq!(page.previous_page, Some(1));

        let last = Page::from_params(vec![21, 22, 23, 24, 25], 25, &PaginationParams::new(3, 10));
        assert_eq!(last.next_page, None);
    }
}
