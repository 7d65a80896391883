//! Attack-surface discovery and link extraction from fetched pages

use crate::models::{AttackSurface, HttpMethod, SurfaceSource};
use scraper::{ElementRef, Html, Selector};
use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;
use tracing::debug;
use url::{Origin, Url};

static FORM: LazyLock<Selector> = LazyLock::new(|| selector("form"));
static FORM_FIELDS: LazyLock<Selector> =
    LazyLock::new(|| selector("input[name], textarea[name], select[name]"));
static LINKS: LazyLock<Selector> = LazyLock::new(|| selector("a[href]"));

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

/// Value sent for form fields that carry no value of their own
const FORM_PLACEHOLDER: &str = "test";

/// Every testable surface on a page: its own query string, its forms, and its
/// same-origin links with query strings. Duplicates are dropped, first one wins.
pub fn discover_surfaces(html: &str, page_url: &Url) -> Vec<AttackSurface> {
    let mut surfaces = Vec::new();
    surfaces.extend(query_surface(page_url, SurfaceSource::QueryString));

    let document = Html::parse_document(html);
    surfaces.extend(form_surfaces(&document, page_url));
    surfaces.extend(link_surfaces(&document, page_url));

    let mut seen = HashSet::new();
    surfaces.retain(|s| seen.insert(s.clone()));
    debug!("{} surfaces on {page_url}", surfaces.len());
    surfaces
}

/// GET surface for a URL's query string; `None` when it has no parameters
fn query_surface(url: &Url, source: SurfaceSource) -> Option<AttackSurface> {
    let mut parameters = Vec::new();
    let mut original_values = BTreeMap::new();
    for (name, value) in url.query_pairs() {
        if name.is_empty() {
            continue;
        }
        if !original_values.contains_key(name.as_ref()) {
            parameters.push(name.to_string());
        }
        // Last value wins, like URLSearchParams.set
        original_values.insert(name.into_owned(), value.into_owned());
    }
    if parameters.is_empty() {
        return None;
    }

    let mut action = url.clone();
    action.set_query(None);
    action.set_fragment(None);
    Some(AttackSurface {
        action: action.to_string(),
        method: HttpMethod::Get,
        parameters,
        original_values,
        source,
    })
}

fn form_surfaces(document: &Html, page_url: &Url) -> Vec<AttackSurface> {
    let origin = page_url.origin();
    document
        .select(&FORM)
        .filter_map(|form| form_surface(form, page_url, &origin))
        .collect()
}

fn form_surface(form: ElementRef<'_>, page_url: &Url, origin: &Origin) -> Option<AttackSurface> {
    let raw_action = form.value().attr("action").unwrap_or("").trim();
    let mut action = if raw_action.is_empty() {
        page_url.clone()
    } else {
        match page_url.join(raw_action) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => url,
            _ => {
                debug!("Malformed form action {raw_action:?} on {page_url}, using page URL");
                page_url.clone()
            }
        }
    };
    if action.origin() != *origin {
        debug!("Skipping cross-origin form {action}");
        return None;
    }
    action.set_fragment(None);

    let mut parameters = Vec::new();
    let mut original_values = BTreeMap::new();
    for field in form.select(&FORM_FIELDS) {
        let Some(name) = field.value().attr("name").map(str::trim).filter(|n| !n.is_empty()) else {
            continue;
        };
        if original_values.contains_key(name) {
            continue;
        }
        let value = field
            .value()
            .attr("value")
            .filter(|v| !v.is_empty())
            .unwrap_or(FORM_PLACEHOLDER);
        parameters.push(name.to_string());
        original_values.insert(name.to_string(), value.to_string());
    }
    if parameters.is_empty() {
        return None;
    }

    Some(AttackSurface {
        action: action.to_string(),
        method: HttpMethod::from_form_attr(form.value().attr("method")),
        parameters,
        original_values,
        source: SurfaceSource::Form,
    })
}

fn link_surfaces(document: &Html, page_url: &Url) -> Vec<AttackSurface> {
    let origin = page_url.origin();
    document
        .select(&LINKS)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| resolve_href(page_url, href))
        .filter(|url| url.origin() == origin)
        .filter_map(|url| query_surface(&url, SurfaceSource::Link))
        .collect()
}

/// Resolves an href against the page URL, skipping non-navigational schemes
fn resolve_href(page_url: &Url, raw: &str) -> Option<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty()
        || trimmed.starts_with('#')
        || trimmed.starts_with("mailto:")
        || trimmed.starts_with("tel:")
        || trimmed.starts_with("javascript:")
        || trimmed.starts_with("data:")
    {
        return None;
    }
    let mut resolved = page_url.join(trimmed).ok()?;
    if !matches!(resolved.scheme(), "http" | "https") {
        return None;
    }
    resolved.set_fragment(None);
    Some(resolved)
}

/// Links worth crawling from a page. With `origin` set, only that origin is kept.
pub fn extract_links(html: &str, page_url: &Url, origin: Option<&Origin>) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    document
        .select(&LINKS)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| resolve_href(page_url, href))
        .filter(|url| origin.map_or(true, |o| url.origin() == *o))
        .filter(|url| should_crawl_path(url.path()))
        .map(|url| url.to_string())
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

/// Filters out static assets that never carry attack surfaces
fn should_crawl_path(path: &str) -> bool {
    let skip_extensions = [
        ".png", ".jpg", ".jpeg", ".gif", ".svg", ".ico", ".woff", ".woff2", ".ttf", ".eot", ".mp3",
        ".mp4", ".avi", ".mov", ".pdf", ".zip", ".tar", ".gz", ".css",
    ];

    let lower = path.to_lowercase();
    !skip_extensions.iter().any(|ext| lower.ends_with(ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r##"
        <html><body>
            <a href="/item.php?id=1&amp;sort=asc">Item</a>
            <a href="item.php?id=2#reviews">Same item page</a>
            <a href="https://evil.test/x?id=1">External</a>
            <a href="/about">About</a>
            <a href="mailto:admin@shop.test">Mail</a>
            <form action="/search" method="post">
                <input name="q" />
                <input type="hidden" name="csrf" value="abc" />
                <select name="cat"><option>1</option></select>
                <input type="submit" />
            </form>
            <form action="https://evil.test/login"><input name="user" /></form>
            <form><textarea name="comment"></textarea></form>
        </body></html>
    "##;

    fn page_url() -> Url {
        Url::parse("http://shop.test/catalog/list.php?page=2").expect("valid url")
    }

    #[test]
    fn test_discovers_query_forms_and_links() {
        let surfaces = discover_surfaces(PAGE, &page_url());

        let query = surfaces
            .iter()
            .find(|s| s.source == SurfaceSource::QueryString)
            .expect("query surface");
        assert_eq!(query.action, "http://shop.test/catalog/list.php");
        assert_eq!(query.parameters, vec!["page"]);

        let search = surfaces
            .iter()
            .find(|s| s.action == "http://shop.test/search")
            .expect("search form");
        assert_eq!(search.method, HttpMethod::Post);
        assert_eq!(search.parameters, vec!["q", "csrf", "cat"]);
        assert_eq!(search.original_values.get("q").map(String::as_str), Some("test"));
        assert_eq!(search.original_values.get("csrf").map(String::as_str), Some("abc"));

        let comment = surfaces
            .iter()
            .find(|s| s.parameters == vec!["comment".to_string()])
            .expect("action-less form");
        assert_eq!(comment.method, HttpMethod::Get);
        assert_eq!(comment.action, "http://shop.test/catalog/list.php?page=2");

        let links: Vec<_> = surfaces
            .iter()
            .filter(|s| s.source == SurfaceSource::Link)
            .collect();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].action, "http://shop.test/item.php");
        assert_eq!(links[0].parameters, vec!["id", "sort"]);
        // Relative to the page directory, not the site root
        assert_eq!(links[1].action, "http://shop.test/catalog/item.php");

        assert!(!surfaces.iter().any(|s| s.action.contains("evil.test")));
    }

    #[test]
    fn test_discovery_is_idempotent() {
        let first: HashSet<_> = discover_surfaces(PAGE, &page_url()).into_iter().collect();
        let second: HashSet<_> = discover_surfaces(PAGE, &page_url()).into_iter().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_static_page_has_no_surfaces() {
        let url = Url::parse("http://shop.test/").expect("valid url");
        assert!(discover_surfaces("<html><body><p>hello</p></body></html>", &url).is_empty());
    }

    #[test]
    fn test_malformed_action_falls_back_to_page() {
        let url = page_url();
        let html = r#"<form action="http://[::1"><input name="x"></form>"#;
        let surfaces = discover_surfaces(html, &url);
        let form = surfaces
            .iter()
            .find(|s| s.source == SurfaceSource::Form)
            .expect("form surface");
        assert_eq!(form.action, url.to_string());
    }

    #[test]
    fn test_extract_links_filters_origin_and_assets() {
        let url = page_url();
        let html = r#"
            <a href="/about">About</a>
            <a href="/about#team">About again</a>
            <a href="/logo.png">Logo</a>
            <a href="https://other.test/">Other</a>
            <a href="javascript:void(0)">JS</a>
        "#;
        let origin = url.origin();
        let same = extract_links(html, &url, Some(&origin));
        assert_eq!(same, vec!["http://shop.test/about".to_string()]);

        let any = extract_links(html, &url, None);
        assert_eq!(any.len(), 2);
        assert!(any.contains(&"https://other.test/".to_string()));
    }
}
