use serde::{Deserialize, Serialize};

/// Page selection. `page` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 1, page_size: 50 }
    }
}

impl PageRequest {
    /// Clamp to `page >= 1` and `1 <= page_size <= max_page_size`.
    pub fn new(page: Option<u32>, page_size: Option<u32>, max_page_size: u32) -> Self {
        let defaults = Self::default();
        Self {
            page: page.unwrap_or(defaults.page).max(1),
            page_size: page_size
                .unwrap_or(defaults.page_size)
                .clamp(1, max_page_size.max(1)),
        }
    }

    pub fn offset(&self) -> usize {
        (self.page.saturating_sub(1) as usize).saturating_mul(self.page_size as usize)
    }
}

/// One page of results; `total` counts the whole filtered set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagedResult<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub has_more: bool,
}

impl<T> PagedResult<T> {
    /// Cut `request`'s page out of an already filtered and ordered set.
    pub fn from_ordered(all: Vec<T>, request: PageRequest) -> Self {
        let total = all.len();
        let offset = request.offset();
        let items: Vec<T> = all
            .into_iter()
            .skip(offset)
            .take(request.page_size as usize)
            .collect();
        let has_more = offset.saturating_add(items.len()) < total;

        Self {
            items,
            total: total as u64,
            page: request.page,
            page_size: request.page_size,
            has_more,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> PagedResult<U> {
        PagedResult {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            page_size: self.page_size,
            has_more: self.has_more,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_is_clamped() {
        let r = PageRequest::new(Some(0), Some(5_000), 200);
        assert_eq!(r, PageRequest { page: 1, page_size: 200 });

        let r = PageRequest::new(None, Some(0), 200);
        assert_eq!(r.page_size, 1);
    }

    #[test]
    fn pages_report_total_of_whole_set() {
        let all: Vec<u32> = (0..7).collect();

        let first = PagedResult::from_ordered(all.clone(), PageRequest { page: 1, page_size: 3 });
        assert_eq!(first.items, vec![0, 1, 2]);
        assert_eq!(first.total, 7);
        assert!(first.has_more);

        let last = PagedResult::from_ordered(all.clone(), PageRequest { page: 3, page_size: 3 });
        assert_eq!(last.items, vec![6]);
        assert!(!last.has_more);

        let past_end = PagedResult::from_ordered(all, PageRequest { page: 9, page_size: 3 });
        assert!(past_end.items.is_empty());
        assert_eq!(past_end.total, 7);
        assert!(!past_end.has_more);
    }
}
