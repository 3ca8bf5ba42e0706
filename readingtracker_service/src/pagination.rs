use serde::Deserialize;

use crate::api::PaginatedResponse;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Deserialize)]
pub struct PaginationSettings {
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for PaginationSettings {
    fn default() -> Self {
        Self {
            default_page_size: 10,
            max_page_size: 100,
        }
    }
}

#[derive(thiserror::Error, Debug, Eq, PartialEq)]
#[error("Invalid page.")]
pub struct InvalidPage;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
/// 1-based page number and page size
pub struct PageRequest {
    pub number: u32,
    pub size: u32,
}

impl PageRequest {
    /// Page size falls back to the default when invalid and is capped at the maximum.
    /// Page number has to be a positive integer.
    pub fn from_query(
        page: Option<&str>,
        page_size: Option<&str>,
        settings: &PaginationSettings,
    ) -> Result<Self, InvalidPage> {
        let size = page_size
            .and_then(|size| size.trim().parse::<u32>().ok())
            .filter(|size| *size > 0)
            .map(|size| size.min(settings.max_page_size))
            .unwrap_or(settings.default_page_size);

        let number = match page {
            None => 1,
            Some(page) => page.trim().parse::<u32>().map_err(|_| InvalidPage)?,
        };
        if number == 0 {
            return Err(InvalidPage);
        }

        Ok(Self { number, size })
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.number - 1) * u64::from(self.size)
    }

    pub fn limit(&self) -> u64 {
        u64::from(self.size)
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
/// One page of items together with the number of all matching items
pub struct Page<T> {
    pub count: u64,
    pub items: Vec<T>,
}

impl<T> Page<T> {
    /// Cuts the requested page out of all matching items
    pub fn from_all(all: Vec<T>, request: PageRequest) -> Self {
        let count = all.len() as u64;
        let items = all
            .into_iter()
            .skip(request.offset() as usize)
            .take(request.limit() as usize)
            .collect();
        Self { count, items }
    }

    /// Turns page into api response with next and previous links built from path and query string.
    /// Pages past the last one are invalid, except the first page of an empty result.
    pub fn into_response(
        self,
        request: PageRequest,
        path: &str,
        query_string: &str,
    ) -> Result<PaginatedResponse<T>, InvalidPage> {
        let number_of_pages = self.count.div_ceil(u64::from(request.size)).max(1);
        let number = u64::from(request.number);
        if number > number_of_pages {
            return Err(InvalidPage);
        }

        Ok(PaginatedResponse {
            count: self.count,
            next: (number < number_of_pages)
                .then(|| page_link(path, query_string, request.number + 1)),
            previous: (number > 1).then(|| page_link(path, query_string, request.number - 1)),
            results: self.items,
        })
    }
}

/// Keeps all query parameters apart from page, the first page is linked without it
fn page_link(path: &str, query_string: &str, page: u32) -> String {
    let page_param = format!("page={page}");
    let mut params: Vec<&str> = query_string
        .split('&')
        .filter(|param| !param.is_empty() && param.split('=').next() != Some("page"))
        .collect();
    if page > 1 {
        params.push(&page_param);
    }

    if params.is_empty() {
        path.to_string()
    } else {
        format!("{}?{}", path, params.join("&"))
    }
}
