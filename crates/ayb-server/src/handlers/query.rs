//! Parses the `page`/`perPage`/`filter`/`sort`/`fields`/`search`/`expand`/
//! `skipTotal` query-string parameters shared by collection list requests.

use std::collections::HashMap;

pub const DEFAULT_PAGE: i64 = 1;
pub const DEFAULT_PER_PAGE: i64 = 20;
pub const MAX_PER_PAGE: i64 = 500;
/// A generous ceiling — high enough no legitimate client hits it, low
/// enough that `(page - 1) * perPage` can't overflow building the offset.
pub const MAX_PAGE: i64 = 1_000_000;
pub const MAX_SORT_KEYS: usize = 5;
pub const MAX_EXPAND_DEPTH: usize = 2;

#[derive(Debug, Clone)]
pub struct SortKey {
    pub column: String,
    pub descending: bool,
}

pub struct ListParams {
    pub page: i64,
    pub per_page: i64,
    pub filter: Option<String>,
    pub sort: Vec<SortKey>,
    pub fields: Option<Vec<String>>,
    pub search: Option<String>,
    pub expand: Vec<String>,
    pub skip_total: bool,
}

impl ListParams {
    #[must_use]
    pub fn parse(query: &HashMap<String, String>) -> Self {
        let page = query
            .get("page")
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(DEFAULT_PAGE)
            .clamp(1, MAX_PAGE);
        let per_page = query
            .get("perPage")
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(DEFAULT_PER_PAGE)
            .clamp(1, MAX_PER_PAGE);
        let filter = query.get("filter").map(String::as_str).filter(|s| !s.is_empty()).map(str::to_string);
        let sort = query.get("sort").map(|s| parse_sort(s)).unwrap_or_default();
        let fields = query.get("fields").map(|s| {
            s.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        });
        let search = query.get("search").map(String::as_str).filter(|s| !s.is_empty()).map(str::to_string);
        let expand = query
            .get("expand")
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let skip_total = query.get("skipTotal").is_some_and(|v| v == "true" || v == "1");

        Self {
            page,
            per_page,
            filter,
            sort,
            fields,
            search,
            expand,
            skip_total,
        }
    }
}

fn parse_sort(raw: &str) -> Vec<SortKey> {
    raw.split(',')
        .filter_map(|token| {
            let token = token.trim();
            let (descending, column) = match token.strip_prefix('-') {
                Some(rest) => (true, rest),
                None => (false, token.strip_prefix('+').unwrap_or(token)),
            };
            if column.is_empty() {
                None
            } else {
                Some(SortKey {
                    column: column.to_string(),
                    descending,
                })
            }
        })
        .take(MAX_SORT_KEYS)
        .collect()
}

/// `users.posts,users.posts.comments` → up to two segments deep, dropping
/// anything beyond [`MAX_EXPAND_DEPTH`].
#[must_use]
pub fn parse_expand_path(path: &str) -> Vec<String> {
    path.split('.')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .take(MAX_EXPAND_DEPTH)
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_query_is_empty() {
        let params = ListParams::parse(&HashMap::new());
        assert_eq!(params.page, 1);
        assert_eq!(params.per_page, 20);
        assert!(!params.skip_total);
    }

    #[test]
    fn per_page_is_clamped_to_max() {
        let mut query = HashMap::new();
        query.insert("perPage".to_string(), "10000".to_string());
        let params = ListParams::parse(&query);
        assert_eq!(params.per_page, MAX_PER_PAGE);
    }

    #[test]
    fn sort_parses_direction_prefixes() {
        let keys = parse_sort("-created_at,+name,id");
        assert_eq!(keys.len(), 3);
        assert!(keys[0].descending);
        assert_eq!(keys[0].column, "created_at");
        assert!(!keys[1].descending);
        assert_eq!(keys[1].column, "name");
        assert!(!keys[2].descending);
    }

    #[test]
    fn sort_caps_key_count() {
        let raw = (0..10).map(|i| format!("col{i}")).collect::<Vec<_>>().join(",");
        assert_eq!(parse_sort(&raw).len(), MAX_SORT_KEYS);
    }

    #[test]
    fn expand_path_caps_at_two_segments() {
        assert_eq!(parse_expand_path("a.b.c"), vec!["a", "b"]);
        assert_eq!(parse_expand_path("a"), vec!["a"]);
    }
}
