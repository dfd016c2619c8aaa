use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct PaginationParams {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
}

fn default_page() -> u64 { 1 }
fn default_per_page() -> u64 { 50 }

impl PaginationParams {
    pub fn offset(&self) -> u64 {
        (self.page.max(1) - 1) * self.limit()
    }

    pub fn limit(&self) -> u64 {
        self.per_page.clamp(1, 200)
    }
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self { page: default_page(), per_page: default_per_page() }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Paginated<T: Serialize> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
    pub total_pages: u64,
}

impl<T: Serialize> Paginated<T> {
    /// Pages over a collection the document store already returned in full.
    pub fn from_all(all: Vec<T>, params: &PaginationParams) -> Self {
        let total = all.len() as u64;
        let per_page = params.limit();
        let items = all
            .into_iter()
            .skip(params.offset() as usize)
            .take(per_page as usize)
            .collect();
        Self {
            items,
            total,
            page: params.page.max(1),
            per_page,
            total_pages: total.div_ceil(per_page),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_page_slices() {
        let params = PaginationParams { page: 2, per_page: 3 };
        let page = Paginated::from_all((1..=8).collect::<Vec<u32>>(), &params);

        assert_eq!(page.items, vec![4, 5, 6]);
        assert_eq!(page.total, 8);
        assert_eq!(page.total_pages, 3);
    }

    #[test]
    fn page_zero_behaves_like_first() {
        let params = PaginationParams { page: 0, per_page: 2 };
        let page = Paginated::from_all(vec!["a", "b", "c"], &params);
        assert_eq!(page.items, vec!["a", "b"]);
        assert_eq!(page.page, 1);
    }

    #[test]
    fn empty_collection() {
        let page = Paginated::<u8>::from_all(Vec::new(), &PaginationParams::default());
        assert_eq!(page.total_pages, 0);
        assert!(page.items.is_empty());
    }
}
