use serde::{Deserialize, Serialize};

pub const MAX_PER_PAGE: u64 = 100;

/// Number of page links shown on each side of the current page.
pub const PAGE_RANGE_DELTA: u64 = 2;

#[derive(Debug, Clone, Deserialize)]
pub struct PaginationParams {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
}

fn default_page() -> u64 { 1 }
fn default_per_page() -> u64 { 25 }

impl PaginationParams {
    pub fn new(page: Option<u64>, per_page: Option<u64>, default_per_page: u64) -> Self {
        Self {
            page: page.unwrap_or(1),
            per_page: per_page.unwrap_or(default_per_page),
        }
    }

    /// Builds params from raw query values. Values that are not integers fall
    /// back to the defaults; negative pages become the first page.
    pub fn parse(page: Option<&str>, per_page: Option<&str>, default_per_page: u64) -> Self {
        let number = |raw: Option<&str>| raw.and_then(|v| v.trim().parse::<i64>().ok());
        Self::new(
            number(page).and_then(|p| u64::try_from(p.max(1)).ok()),
            number(per_page).and_then(|n| u64::try_from(n.max(0)).ok()),
            default_per_page,
        )
    }

    /// Page number with anything below 1 treated as the first page.
    pub fn page(&self) -> u64 {
        self.page.max(1)
    }

    pub fn offset(&self) -> u64 {
        self.page().saturating_sub(1).saturating_mul(self.limit())
    }

    pub fn limit(&self) -> u64 {
        self.per_page.clamp(1, MAX_PER_PAGE)
    }

    /// Offset as a SQL `OFFSET` value, saturating at `i64::MAX`.
    pub fn sql_offset(&self) -> i64 {
        i64::try_from(self.offset()).unwrap_or(i64::MAX)
    }

    pub fn sql_limit(&self) -> i64 {
        i64::try_from(self.limit()).unwrap_or(i64::MAX)
    }
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self { page: 1, per_page: default_per_page() }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Paginated<T: Serialize> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
    pub total_pages: u64,
    pub has_next: bool,
    pub has_prev: bool,
    pub next_page: Option<u64>,
    pub prev_page: Option<u64>,
    pub page_range: Vec<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sorted_by: Option<String>,
}

impl<T: Serialize> Paginated<T> {
    pub fn new(items: Vec<T>, total: u64, params: &PaginationParams) -> Self {
        let per_page = params.limit();
        let page = params.page();
        let total_pages = if total == 0 { 0 } else { total.div_ceil(per_page) };
        let has_next = page < total_pages;
        let has_prev = page > 1;
        Self {
            items,
            total,
            page,
            per_page,
            total_pages,
            has_next,
            has_prev,
            next_page: has_next.then(|| page + 1),
            prev_page: has_prev.then(|| page - 1),
            page_range: page_range(page, total_pages, PAGE_RANGE_DELTA),
            order_by: None,
            sorted_by: None,
        }
    }

    pub fn with_ordering(mut self, order_by: impl Into<String>, sorted_by: impl Into<String>) -> Self {
        self.order_by = Some(order_by.into());
        self.sorted_by = Some(sorted_by.into());
        self
    }

    pub fn map<U: Serialize>(self, f: impl FnMut(T) -> U) -> Paginated<U> {
        Paginated {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            per_page: self.per_page,
            total_pages: self.total_pages,
            has_next: self.has_next,
            has_prev: self.has_prev,
            next_page: self.next_page,
            prev_page: self.prev_page,
            page_range: self.page_range,
            order_by: self.order_by,
            sorted_by: self.sorted_by,
        }
    }
}

/// Window of page numbers to render around `current`.
pub fn page_range(current: u64, total_pages: u64, delta: u64) -> Vec<u64> {
    if total_pages <= 2 * delta + 1 {
        return (1..=total_pages).collect();
    }
    if current <= delta + 1 {
        return (1..=2 * delta + 1).collect();
    }
    if current >= total_pages - delta {
        return (total_pages - 2 * delta..=total_pages).collect();
    }
    (current - delta..=current + delta).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_below_one_is_first_page() {
        let params = PaginationParams { page: 0, per_page: 10 };
        assert_eq!(params.page(), 1);
        assert_eq!(params.offset(), 0);
    }

    #[test]
    fn per_page_is_clamped() {
        assert_eq!(PaginationParams { page: 1, per_page: 500 }.limit(), 100);
        assert_eq!(PaginationParams { page: 1, per_page: 0 }.limit(), 1);
    }

    #[test]
    fn offset_uses_clamped_limit() {
        let params = PaginationParams { page: 3, per_page: 25 };
        assert_eq!(params.offset(), 50);
    }

    #[test]
    fn huge_page_saturates_instead_of_overflowing() {
        let params = PaginationParams { page: 100_000_000_000_000_000, per_page: 100 };
        assert_eq!(params.sql_offset(), i64::MAX);

        let params = PaginationParams { page: u64::MAX, per_page: 100 };
        assert_eq!(params.offset(), u64::MAX);
        assert_eq!(params.sql_offset(), i64::MAX);
        assert_eq!(params.sql_limit(), 100);

        let page = Paginated::<u8>::new(vec![], 40, &params);
        assert!(!page.has_next);
        assert_eq!(page.next_page, None);
        assert_eq!(page.prev_page, Some(u64::MAX - 1));
    }

    #[test]
    fn raw_values_are_parsed_leniently() {
        let params = PaginationParams::parse(Some("-1"), Some("abc"), 12);
        assert_eq!(params.page(), 1);
        assert_eq!(params.limit(), 12);

        let params = PaginationParams::parse(Some(" 4 "), Some("-3"), 12);
        assert_eq!(params.page(), 4);
        assert_eq!(params.limit(), 1);

        let params = PaginationParams::parse(None, Some("500"), 12);
        assert_eq!(params.page(), 1);
        assert_eq!(params.limit(), MAX_PER_PAGE);
    }

    #[test]
    fn paginated_navigation_fields() {
        let params = PaginationParams { page: 2, per_page: 10 };
        let page = Paginated::new(vec![1, 2, 3], 23, &params);
        assert_eq!(page.total_pages, 3);
        assert!(page.has_next);
        assert!(page.has_prev);
        assert_eq!(page.next_page, Some(3));
        assert_eq!(page.prev_page, Some(1));
        assert_eq!(page.page_range, vec![1, 2, 3]);
    }

    #[test]
    fn empty_result_has_no_pages() {
        let page = Paginated::<u8>::new(vec![], 0, &PaginationParams::default());
        assert_eq!(page.total_pages, 0);
        assert!(!page.has_next);
        assert!(!page.has_prev);
        assert!(page.page_range.is_empty());
    }

    #[test]
    fn page_range_windows() {
        assert_eq!(page_range(1, 4, 2), vec![1, 2, 3, 4]);
        assert_eq!(page_range(2, 10, 2), vec![1, 2, 3, 4, 5]);
        assert_eq!(page_range(9, 10, 2), vec![6, 7, 8, 9, 10]);
        assert_eq!(page_range(5, 10, 2), vec![3, 4, 5, 6, 7]);
    }
}
