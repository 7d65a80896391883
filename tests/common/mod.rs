//! Common test utilities
#![allow(dead_code)]

use regex::Regex;
use sqlspider::crawler::stats::CrawlStats;
use sqlspider::crawler::StopSignal;
use sqlspider::events::{NullReporter, SpiderEvent};
use sqlspider::http::HttpClient;
use sqlspider::models::{AttackSurface, HttpMethod, SpiderOptions, SurfaceSource};
use sqlspider::scanner::payloads::PayloadStore;
use sqlspider::scanner::{Prober, ScanContext};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use wiremock::{Request, Respond, ResponseTemplate};

pub const PRODUCT_PAGE: &str = "<html><head><title>Acme Shop</title></head><body>\
    <h1>Red Running Shoes</h1>\
    <p>Lightweight trainers with a breathable mesh upper and a cushioned sole. \
    Free delivery on orders over fifty pounds. In stock: 14 pairs.</p>\
    <p>Customer rating 4 of 5 stars from 212 reviews.</p></body></html>";

pub const EMPTY_PAGE: &str = "<html><body><p>No products found.</p></body></html>";

pub const MYSQL_ERROR: &str = "<html><body><b>Warning</b>: You have an error in your SQL syntax; \
    check the manual that corresponds to your MySQL version for the right syntax to use near '' at line 1</body></html>";

/// Options for tests: deterministic payloads, no WAF probe, short crawl
pub fn test_options(url: &str) -> SpiderOptions {
    SpiderOptions {
        url: url.to_string(),
        depth: 1,
        threads: 2,
        timeout_ms: 10_000,
        mutate_payloads: false,
        waf_detection: false,
        user_agent: "SQLi-Spider-Test/0.1".to_string(),
        ..SpiderOptions::default()
    }
}

/// Detection context over a real client and the built-in payloads
pub fn scan_context(options: SpiderOptions) -> ScanContext {
    let client = HttpClient::from_options(&options).expect("failed to create client");
    let prober = Prober::new(
        client,
        Arc::new(CrawlStats::new()),
        StopSignal::new(),
        Arc::new(NullReporter),
    );
    ScanContext::new(prober, PayloadStore::builtin(), options)
}

pub fn surface(action: &str, method: HttpMethod, params: &[(&str, &str)]) -> AttackSurface {
    let original_values: BTreeMap<String, String> = params
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    AttackSurface {
        action: action.to_string(),
        method,
        parameters: params.iter().map(|(k, _)| k.to_string()).collect(),
        original_values,
        source: match method {
            HttpMethod::Get => SurfaceSource::QueryString,
            HttpMethod::Post => SurfaceSource::Form,
        },
    }
}

/// Value of `name` in the query string, or in the form body for POST
pub fn param_value(request: &Request, name: &str) -> Option<String> {
    let from_query = request
        .url
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned());
    from_query.or_else(|| {
        url::form_urlencoded::parse(&request.body)
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    })
}

pub fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/html; charset=utf-8")
}

/// Everything currently buffered in a ChannelReporter's receiver
pub fn drain(rx: &mut UnboundedReceiver<SpiderEvent>) -> Vec<SpiderEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// How the emulated backend reports a broken query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStyle {
    /// MySQL syntax error text in a 200 page
    MySql,
    /// Bare 500 page without database details
    Generic,
}

/// Emulates `SELECT ... WHERE <param> = '<value>'` over a single-row table
pub struct MockDb {
    pub param: &'static str,
    pub errors: ErrorStyle,
    /// Columns of the vulnerable query; `None` disables ORDER BY/UNION emulation
    pub columns: Option<usize>,
    /// Whether `ORDER BY n` past the last column raises an ordinal error
    pub ordinal_errors: bool,
    pub version: &'static str,
    /// Delay applied to MySQL `SLEEP(` in an executed query
    pub sleep: Option<Duration>,
}

impl MockDb {
    pub fn new(param: &'static str, errors: ErrorStyle) -> Self {
        Self {
            param,
            errors,
            columns: None,
            ordinal_errors: true,
            version: "8.0.36",
            sleep: None,
        }
    }

    fn broken(&self) -> ResponseTemplate {
        match self.errors {
            ErrorStyle::MySql => html(MYSQL_ERROR),
            ErrorStyle::Generic => ResponseTemplate::new(500).set_body_raw(
                "<html><body><h1>Internal Server Error</h1></body></html>",
                "text/html",
            ),
        }
    }

    fn union(&self, select: &str, columns: usize) -> ResponseTemplate {
        let items = split_select(select);
        if items.len() != columns {
            return html("<html><body>The used SELECT statements have a different number of columns</body></html>");
        }
        let Some(expr) = items.get(1).filter(|i| i.starts_with("CONCAT(")) else {
            return html(EMPTY_PAGE);
        };
        let value = if expr.contains("@@version") {
            self.version.to_string()
        } else if expr.contains("information_schema.tables") {
            "users,orders".to_string()
        } else if expr.contains("information_schema.columns") {
            "id,email,password".to_string()
        } else {
            return html(EMPTY_PAGE);
        };
        html(&format!("<html><body><p>~!@{value}@!~</p></body></html>"))
    }
}

impl Respond for MockDb {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let Some(value) = param_value(request, self.param) else {
            return html(PRODUCT_PAGE);
        };

        let (executed, commented) = match value.find('#').or_else(|| value.find("--")) {
            Some(at) => (&value[..at], true),
            None => (value.as_str(), false),
        };
        let quotes = 1 + executed.matches('\'').count() + usize::from(!commented);
        if quotes % 2 == 1 {
            return self.broken();
        }

        if let Some(columns) = self.columns {
            if let Some(caps) = ORDER_BY.captures(executed) {
                let n: usize = caps[1].parse().unwrap_or(0);
                return if n > columns && self.ordinal_errors {
                    html(&format!(
                        "<html><body>Unknown column '{n}' in 'order clause'</body></html>"
                    ))
                } else {
                    html(PRODUCT_PAGE)
                };
            }
            if let Some(at) = executed.find("UNION SELECT ") {
                return self.union(executed[at + "UNION SELECT ".len()..].trim(), columns);
            }
        }

        if let Some(caps) = BLIND_CHAR.captures(executed) {
            let position: usize = caps[1].parse().unwrap_or(0);
            let code: u32 = caps[2].parse().unwrap_or(0);
            let actual = self
                .version
                .chars()
                .nth(position.saturating_sub(1))
                .map(|c| c as u32);
            return html(if actual == Some(code) { PRODUCT_PAGE } else { EMPTY_PAGE });
        }

        if executed.contains("1=2") || executed.contains("'a'='b'") || executed.contains("='x'") {
            return html(EMPTY_PAGE);
        }

        if let Some(delay) = self.sleep {
            let upper = executed.to_ascii_uppercase();
            if upper.contains(" SLEEP(") && !upper.contains("PG_SLEEP") {
                return html(PRODUCT_PAGE).set_delay(delay);
            }
        }

        html(PRODUCT_PAGE)
    }
}

static ORDER_BY: std::sync::LazyLock<Regex> =
    std::sync::LazyLock::new(|| Regex::new(r"ORDER BY (\d+)").expect("order by regex"));
static BLIND_CHAR: std::sync::LazyLock<Regex> = std::sync::LazyLock::new(|| {
    Regex::new(r"ASCII\(SUBSTRING\(\(@@version\),(\d+),1\)\)=(\d+)").expect("blind regex")
});

/// Splits a select list on top-level commas
fn split_select(select: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut depth = 0i32;
    let mut in_quote = false;
    let mut current = String::new();
    for c in select.chars() {
        match c {
            '\'' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => depth -= 1,
            ',' if !in_quote && depth == 0 => {
                items.push(current.trim().to_string());
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    if !current.trim().is_empty() {
        items.push(current.trim().to_string());
    }
    items
}
