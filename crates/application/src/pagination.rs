//! 分页请求与分页结果

use serde::{Deserialize, Serialize};

pub const DEFAULT_PER_PAGE: u32 = 50;
pub const MAX_PER_PAGE: u32 = 250;

/// 页码从 1 开始；越界参数会被收敛到合法范围。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    page: u32,
    per_page: u32,
}

impl PageRequest {
    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, MAX_PER_PAGE),
        }
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn per_page(&self) -> u32 {
        self.per_page
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.per_page)
    }

    pub fn limit(&self) -> u64 {
        u64::from(self.per_page)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, DEFAULT_PER_PAGE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageMeta {
    pub page: u32,
    pub per_page: u32,
    pub total_items: u64,
    pub total_pages: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub meta: PageMeta,
    pub items: Vec<T>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, request: PageRequest, total_items: u64) -> Self {
        let per_page = u64::from(request.per_page());
        Self {
            meta: PageMeta {
                page: request.page(),
                per_page: request.per_page(),
                total_items,
                total_pages: total_items.div_ceil(per_page),
            },
            items,
        }
    }

    /// 对一个已经排好序的完整集合取出当前页。
    pub fn slice(all: Vec<T>, request: PageRequest) -> Self {
        let total = all.len() as u64;
        let items = all
            .into_iter()
            .skip(request.offset() as usize)
            .take(request.limit() as usize)
            .collect();
        Self::new(items, request, total)
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            meta: self.meta,
            items: self.items.into_iter().map(f).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_values_are_clamped() {
        let request = PageRequest::new(0, 1_000);
        assert_eq!(request.page(), 1);
        assert_eq!(request.per_page(), MAX_PER_PAGE);

        assert_eq!(PageRequest::new(3, 0).per_page(), 1);
    }

    #[test]
    fn total_pages_rounds_up() {
        let page = Page::new(vec![1, 2], PageRequest::new(1, 2), 5);
        assert_eq!(page.meta.total_pages, 3);

        let empty: Page<i32> = Page::new(vec![], PageRequest::default(), 0);
        assert_eq!(empty.meta.total_pages, 0);
    }

    #[test]
    fn slice_returns_requested_window() {
        let page = Page::slice((1..=7).collect(), PageRequest::new(2, 3));
        assert_eq!(page.items, vec![4, 5, 6]);
        assert_eq!(page.meta.total_items, 7);
    }
}
