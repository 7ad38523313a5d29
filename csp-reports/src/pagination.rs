//! Pagination for report listings (100 reports/page)

/// Page size for every paginated listing
pub const PAGE_SIZE: usize = 100;

/// Pagination metadata for one page of a listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    /// Current page number (1-indexed)
    pub page: usize,
    pub total_pages: usize,
    pub total: usize,
    #[serde(skip)]
    pub offset: usize,
}

/// Clamp `requested_page` into `[1, total_pages]` and compute the slice offset
///
/// ```
/// use csp_reports::pagination::calculate_pagination;
///
/// let p = calculate_pagination(250, 99);
/// assert_eq!(p.page, 3);
/// assert_eq!(p.offset, 200);
/// ```
pub fn calculate_pagination(total: usize, requested_page: usize) -> Pagination {
    let total_pages = total.div_ceil(PAGE_SIZE);
    let page = requested_page.max(1).min(total_pages.max(1));

    Pagination {
        page,
        total_pages,
        total,
        offset: (page - 1) * PAGE_SIZE,
    }
}

/// Items on the page described by `pagination`
pub fn page_of<'a, T>(items: &'a [T], pagination: &Pagination) -> &'a [T] {
    let start = pagination.offset.min(items.len());
    let end = (start + PAGE_SIZE).min(items.len());
    &items[start..end]
}
