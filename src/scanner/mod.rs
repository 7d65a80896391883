//! SQL injection detection: probing, confirmation and extraction
//!
//! Every request a technique sends goes through [`Prober`], which builds the
//! request for a (surface, parameter, value) triple, counts it, and retries
//! dropped connections once.

pub mod blind;
pub mod comparator;
pub mod confirm;
pub mod fingerprint;
pub mod headers;
pub mod mutation;
pub mod payloads;
pub mod sql_errors;
pub mod union;
pub mod waf;

use crate::crawler::stats::CrawlStats;
use crate::crawler::StopSignal;
use crate::error::{Result, SpiderError};
use crate::events::{LogLevel, Reporter};
use crate::http::retry::{retry_with_backoff, RetryPolicy};
use crate::http::HttpClient;
use crate::models::{AttackSurface, CapturedResponse, Finding, HttpMethod, SpiderOptions};
use mutation::Mutator;
use payloads::PayloadStore;
use sql_errors::SqlErrorMatch;
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// What a request was sent for; used for per-category statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeKind {
    Probe,
    Waf,
    Fingerprint,
    Boolean,
    Error,
    Time,
    ColumnCount,
    Union,
    Blind,
}

impl ProbeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeKind::Probe => "probes",
            ProbeKind::Waf => "waf",
            ProbeKind::Fingerprint => "fingerprint",
            ProbeKind::Boolean => "boolean",
            ProbeKind::Error => "error",
            ProbeKind::Time => "time",
            ProbeKind::ColumnCount => "column_count",
            ProbeKind::Union => "union",
            ProbeKind::Blind => "blind",
        }
    }
}

/// Why a crawl-side probe earned a full confirmation attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeSignal {
    SqlError(SqlErrorMatch),
    ResponseDiff,
}

/// Parameter values sent for one probe: the surface's values with `param` set to `value`
pub fn probe_params(surface: &AttackSurface, param: &str, value: &str) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = surface
        .original_values
        .iter()
        .map(|(k, v)| {
            if k == param {
                (k.clone(), value.to_string())
            } else {
                (k.clone(), v.clone())
            }
        })
        .collect();
    if !surface.original_values.contains_key(param) {
        params.push((param.to_string(), value.to_string()));
    }
    params
}

/// Action URL with the probe's parameters as query string
pub fn probe_url(surface: &AttackSurface, param: &str, value: &str) -> Result<String> {
    let mut url = Url::parse(&surface.action)?;
    url.set_fragment(None);
    url.query_pairs_mut()
        .clear()
        .extend_pairs(probe_params(surface, param, value));
    Ok(url.to_string())
}

/// Endpoint reported for a finding: the full probe URL for GET, the action for POST
pub fn finding_endpoint(surface: &AttackSurface, param: &str, value: &str) -> String {
    match surface.method {
        HttpMethod::Get => probe_url(surface, param, value).unwrap_or_else(|_| surface.action.clone()),
        HttpMethod::Post => surface.action.clone(),
    }
}

/// Parameter names that are tested first when present
const PRIORITY_PARAMS: &[&str] = &[
    "id", "user", "item", "cat", "uid", "pid", "page", "q", "search", "query", "name", "filter",
    "category", "product",
];

/// Orders parameters so commonly injectable names come first; stable otherwise
pub fn prioritize_params(params: &[String]) -> Vec<String> {
    let is_priority = |p: &String| {
        let lower = p.to_ascii_lowercase();
        PRIORITY_PARAMS.iter().any(|k| lower.contains(k))
    };
    let (mut first, rest): (Vec<String>, Vec<String>) = params.iter().cloned().partition(is_priority);
    first.extend(rest);
    first
}

/// Sends probe requests on behalf of every detection technique
pub struct Prober {
    client: HttpClient,
    stats: Arc<CrawlStats>,
    stop: StopSignal,
    reporter: Arc<dyn Reporter>,
    retry: RetryPolicy,
}

impl Prober {
    pub fn new(
        client: HttpClient,
        stats: Arc<CrawlStats>,
        stop: StopSignal,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            client,
            stats,
            stop,
            reporter,
            retry: RetryPolicy::probe(),
        }
    }

    /// Sends `value` in `param` of `surface`. Only dropped connections are retried.
    pub async fn send(
        &self,
        surface: &AttackSurface,
        param: &str,
        value: &str,
        kind: ProbeKind,
    ) -> Result<CapturedResponse> {
        self.stats.record_payload(kind.as_str());

        let (url, form) = match surface.method {
            HttpMethod::Get => (probe_url(surface, param, value)?, None),
            HttpMethod::Post => (surface.action.clone(), Some(probe_params(surface, param, value))),
        };
        debug!("[{}] {} {param}={value}", kind.as_str(), surface.method);

        retry_with_backoff(
            &self.retry,
            || self.client.request(&url, surface.method, form.as_deref(), &[], None),
            |e: &SpiderError| e.is_connection(),
        )
        .await
    }

    /// Sends the surface with its original values, for comparison against probes
    pub async fn fetch_baseline(&self, surface: &AttackSurface) -> Result<CapturedResponse> {
        let params: Vec<(String, String)> = surface
            .original_values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let (url, form) = match surface.method {
            HttpMethod::Get => {
                let mut url = Url::parse(&surface.action)?;
                url.set_fragment(None);
                url.query_pairs_mut().clear().extend_pairs(params);
                (url.to_string(), None)
            }
            HttpMethod::Post => (surface.action.clone(), Some(params)),
        };

        retry_with_backoff(
            &self.retry,
            || self.client.request(&url, surface.method, form.as_deref(), &[], None),
            |e: &SpiderError| e.is_connection(),
        )
        .await
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    pub fn timeout_ms(&self) -> u64 {
        self.client.timeout_ms()
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        self.reporter.log(level, message);
    }
}

/// Everything a detection run needs, shared by all workers of a crawl session
pub struct ScanContext {
    pub prober: Prober,
    pub payloads: PayloadStore,
    pub mutator: Mutator,
    pub options: SpiderOptions,
}

impl ScanContext {
    pub fn new(prober: Prober, payloads: PayloadStore, options: SpiderOptions) -> Self {
        let mutator = Mutator::new(options.mutate_payloads, options.mutation_seed);
        Self {
            prober,
            payloads,
            mutator,
            options,
        }
    }
}

/// Sends the cheap probes to `param` and runs confirmation on the first promising
/// one. Remaining probes are skipped once a finding is produced.
pub async fn test_parameter(
    ctx: &ScanContext,
    surface: &AttackSurface,
    param: &str,
    baseline: &CapturedResponse,
) -> Option<Finding> {
    let tuning = &ctx.options.tuning;

    for probe in ctx.payloads.probe_payloads() {
        if ctx.prober.is_stopped() {
            break;
        }

        let resp = match ctx.prober.send(surface, param, &probe, ProbeKind::Probe).await {
            Ok(resp) => resp,
            Err(e) => {
                ctx.prober.log(
                    LogLevel::Error,
                    &format!("Probe {probe:?} on '{param}' @ {} failed: {e}", surface.action),
                );
                continue;
            }
        };

        let signal = match sql_errors::detect(&resp.body) {
            Some(m) => Some(ProbeSignal::SqlError(m)),
            None if comparator::responses_differ(
                baseline,
                &resp,
                tuning.diff_tolerance,
                tuning.length_floor,
            ) =>
            {
                Some(ProbeSignal::ResponseDiff)
            }
            None => None,
        };

        let Some(signal) = signal else { continue };
        let reason = match &signal {
            ProbeSignal::SqlError(m) => format!("SQL error \"{}\"", m.matched),
            ProbeSignal::ResponseDiff => format!(
                "response diff (baseline {} chars, probe {} chars)",
                baseline.body.len(),
                resp.body.len()
            ),
        };
        ctx.prober.log(
            LogLevel::Warn,
            &format!(
                "Potential SQLi in '{param}' with {probe:?} @ {}: {reason}",
                surface.action
            ),
        );

        if let Some(finding) = confirm::confirm(ctx, surface, param, baseline, &probe, &signal).await {
            return Some(finding);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SurfaceSource;
    use std::collections::BTreeMap;

    fn surface(method: HttpMethod) -> AttackSurface {
        let mut original_values = BTreeMap::new();
        original_values.insert("id".to_string(), "1".to_string());
        original_values.insert("sort".to_string(), "asc".to_string());
        AttackSurface {
            action: "http://shop.test/item.php".to_string(),
            method,
            parameters: vec!["id".to_string(), "sort".to_string()],
            original_values,
            source: SurfaceSource::QueryString,
        }
    }

    #[test]
    fn test_probe_url_replaces_only_target_param() {
        let url = probe_url(&surface(HttpMethod::Get), "id", "1' AND 1=1 #").expect("url");
        let parsed = Url::parse(&url).expect("parse");
        let pairs: BTreeMap<String, String> = parsed.query_pairs().into_owned().collect();
        assert_eq!(pairs.get("id").map(String::as_str), Some("1' AND 1=1 #"));
        assert_eq!(pairs.get("sort").map(String::as_str), Some("asc"));
        assert!(parsed.fragment().is_none());
    }

    #[test]
    fn test_probe_params_adds_missing_param() {
        let params = probe_params(&surface(HttpMethod::Post), "debug", "'");
        assert_eq!(params.len(), 3);
        assert!(params.contains(&("debug".to_string(), "'".to_string())));
    }

    #[test]
    fn test_finding_endpoint_per_method() {
        assert!(finding_endpoint(&surface(HttpMethod::Get), "id", "'").contains("id=%27"));
        assert_eq!(
            finding_endpoint(&surface(HttpMethod::Post), "id", "'"),
            "http://shop.test/item.php"
        );
    }

    #[test]
    fn test_prioritize_params_is_stable() {
        let params: Vec<String> = ["lang", "theme", "product_id", "q", "ref"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            prioritize_params(&params),
            vec!["product_id", "q", "lang", "theme", "ref"]
        );
    }
}
