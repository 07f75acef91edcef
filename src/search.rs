//! Route catalog search: exclusion, ranking and pagination.

use transit_types::Route;

pub const DEFAULT_LIMIT: usize = 10;

/// How well `route` matches `query`; lower is better, `None` is no match.
/// Identifiers beat names, prefixes beat substrings, substrings beat
/// scattered subsequences.
fn match_score(route: &Route, query: &str) -> Option<u8> {
    let id = route.route.to_lowercase();
    let name = route.name.to_lowercase();

    if id == query {
        Some(0)
    } else if id.starts_with(query) {
        Some(1)
    } else if name.starts_with(query) {
        Some(2)
    } else if name.split(|c: char| !c.is_alphanumeric()).any(|word| word.starts_with(query)) {
        Some(3)
    } else if id.contains(query) || name.contains(query) {
        Some(4)
    } else if is_subsequence(query, &name) || is_subsequence(query, &id) {
        Some(5)
    } else {
        None
    }
}

fn is_subsequence(needle: &str, haystack: &str) -> bool {
    let mut haystack = haystack.chars();
    needle
        .chars()
        .filter(|c| !c.is_whitespace())
        .all(|c| haystack.any(|h| h == c))
}

/// Ranks `routes` against `query`, dropping non-matches. Ties keep catalog order.
pub fn rank(routes: Vec<Route>, query: &str) -> Vec<Route> {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return routes;
    }
    let mut scored: Vec<(u8, Route)> = routes
        .into_iter()
        .filter_map(|route| match_score(&route, &query).map(|score| (score, route)))
        .collect();
    scored.sort_by_key(|(score, _)| *score);
    scored.into_iter().map(|(_, route)| route).collect()
}

/// One-based page `index` of `limit` items.
pub fn paginate<T>(items: Vec<T>, limit: usize, index: usize) -> Vec<T> {
    let start = index.saturating_sub(1).saturating_mul(limit);
    items.into_iter().skip(start).take(limit).collect()
}

/// The catalog listing: routes in `exclude` are removed before ranking so a
/// selected route never shows up among the unselected results.
pub fn query_catalog(
    catalog: Vec<Route>,
    search: Option<&str>,
    exclude: &[String],
    limit: usize,
    index: usize,
) -> Vec<Route> {
    let remaining: Vec<Route> = catalog
        .into_iter()
        .filter(|route| !exclude.iter().any(|id| *id == route.route))
        .collect();
    let ranked = match search {
        Some(query) => rank(remaining, query),
        None => remaining,
    };
    paginate(ranked, limit, index)
}
