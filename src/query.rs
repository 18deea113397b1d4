use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    CreatedAt,
    ViewCount,
    DownloadCount,
}

impl SortField {
    pub const ALL: [SortField; 3] = [
        SortField::CreatedAt,
        SortField::ViewCount,
        SortField::DownloadCount,
    ];

    pub fn as_column(&self) -> &'static str {
        match self {
            SortField::CreatedAt => "created_at",
            SortField::ViewCount => "view_count",
            SortField::DownloadCount => "download_count",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            SortField::CreatedAt => "Newest",
            SortField::ViewCount => "Most viewed",
            SortField::DownloadCount => "Most downloaded",
        }
    }

    pub fn from_key(key: &str) -> Option<SortField> {
        match key.trim().to_ascii_lowercase().as_str() {
            "created_at" | "newest" | "new" => Some(SortField::CreatedAt),
            "view_count" | "views" => Some(SortField::ViewCount),
            "download_count" | "downloads" => Some(SortField::DownloadCount),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortDirection {
    #[default]
    Descending,
    Ascending,
}

impl SortDirection {
    pub fn is_ascending(&self) -> bool {
        matches!(self, SortDirection::Ascending)
    }
}

/// Raw filter control values, exactly as typed or selected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterState {
    pub category: String,
    pub search: String,
    pub sort: String,
}

#[derive(Debug, Clone)]
pub struct QueryConfig {
    pub page_size: NonZeroU32,
    pub sort_fields: Vec<SortField>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            page_size: NonZeroU32::new(12).unwrap_or(NonZeroU32::MIN),
            sort_fields: SortField::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryDescriptor {
    pub page: u32,
    pub page_size: u32,
    pub category: Option<String>,
    pub search: Option<String>,
    pub sort: SortField,
    pub direction: SortDirection,
}

impl QueryDescriptor {
    /// Zero-based inclusive row window for the current page.
    pub fn window(&self) -> (u64, u64) {
        let size = u64::from(self.page_size.max(1));
        let offset = u64::from(self.page.max(1) - 1) * size;
        (offset, offset + size - 1)
    }

    pub fn same_filter(&self, other: &QueryDescriptor) -> bool {
        self.category == other.category
            && self.search == other.search
            && self.sort == other.sort
            && self.direction == other.direction
    }

    pub fn with_page(&self, page: u32) -> QueryDescriptor {
        QueryDescriptor {
            page: page.max(1),
            ..self.clone()
        }
    }

    pub fn next_page(&self) -> QueryDescriptor {
        self.with_page(self.page.saturating_add(1))
    }
}

/// Normalizes raw filter controls into a descriptor. Unrecognized input never
/// fails: it falls back to the unfiltered newest-first query.
pub fn build_query(filters: &FilterState, page: u32, config: &QueryConfig) -> QueryDescriptor {
    let (sort, direction) = parse_sort(&filters.sort, &config.sort_fields);
    QueryDescriptor {
        page: page.max(1),
        page_size: config.page_size.get(),
        category: non_empty(&filters.category),
        search: non_empty(&filters.search),
        sort,
        direction,
    }
}

fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_sort(raw: &str, allowed: &[SortField]) -> (SortField, SortDirection) {
    let fallback = (SortField::default(), SortDirection::default());
    let mut parts = raw.split_whitespace();
    let Some(field) = parts.next().and_then(SortField::from_key) else {
        return fallback;
    };
    if !allowed.is_empty() && !allowed.contains(&field) {
        return fallback;
    }
    let direction = match parts.next().map(|s| s.to_ascii_lowercase()) {
        None => SortDirection::Descending,
        Some(dir) if dir == "desc" => SortDirection::Descending,
        Some(dir) if dir == "asc" => SortDirection::Ascending,
        Some(_) => return fallback,
    };
    if parts.next().is_some() {
        return fallback;
    }
    (field, direction)
}
