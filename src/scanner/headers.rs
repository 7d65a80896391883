//! Missing protection headers on crawled pages

use crate::models::{CapturedResponse, Finding};
use std::collections::HashSet;
use std::sync::Mutex;
use url::Url;

pub const CONTENT_SECURITY_POLICY: &str = "Content-Security-Policy";
pub const X_FRAME_OPTIONS: &str = "X-Frame-Options";

enum HeaderResult {
    Missing,
    Present,
}

fn check_csp(value: Option<&str>) -> HeaderResult {
    match value {
        Some(v) if !v.trim().is_empty() => HeaderResult::Present,
        _ => HeaderResult::Missing,
    }
}

/// A CSP `frame-ancestors` directive stands in for X-Frame-Options
fn check_frame_options(xfo: Option<&str>, csp: Option<&str>) -> HeaderResult {
    let framing_in_csp = csp
        .map(|v| v.to_ascii_lowercase().contains("frame-ancestors"))
        .unwrap_or(false);
    match xfo {
        Some(v) if !v.trim().is_empty() => HeaderResult::Present,
        _ if framing_in_csp => HeaderResult::Present,
        _ => HeaderResult::Missing,
    }
}

/// Protection headers absent from `resp`
pub fn missing_protections(resp: &CapturedResponse) -> Vec<&'static str> {
    let csp = resp.header("content-security-policy");
    let mut missing = Vec::new();
    if let HeaderResult::Missing = check_csp(csp) {
        missing.push(CONTENT_SECURITY_POLICY);
    }
    if let HeaderResult::Missing = check_frame_options(resp.header("x-frame-options"), csp) {
        missing.push(X_FRAME_OPTIONS);
    }
    missing
}

/// Checks each origin once per run
#[derive(Default)]
pub struct HeaderAudit {
    checked_origins: Mutex<HashSet<String>>,
}

impl HeaderAudit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Findings for `resp` if it is the first response seen from its origin
    pub fn check(&self, resp: &CapturedResponse) -> Vec<Finding> {
        let Ok(url) = Url::parse(&resp.url) else {
            return Vec::new();
        };
        let origin = url.origin().ascii_serialization();
        let first_visit = match self.checked_origins.lock() {
            Ok(mut guard) => guard.insert(origin.clone()),
            Err(poisoned) => poisoned.into_inner().insert(origin.clone()),
        };
        if !first_visit {
            return Vec::new();
        }

        missing_protections(resp)
            .into_iter()
            .map(|header| Finding::missing_protection(origin.clone(), header))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FindingStatus, Severity};
    use std::collections::HashMap;

    fn resp(url: &str, headers: &[(&str, &str)]) -> CapturedResponse {
        CapturedResponse {
            status: 200,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
            body: String::new(),
            url: url.to_string(),
            elapsed_ms: 1,
        }
    }

    #[test]
    fn test_missing_headers() {
        let bare = resp("http://t/", &[]);
        assert_eq!(missing_protections(&bare), vec![CONTENT_SECURITY_POLICY, X_FRAME_OPTIONS]);

        let framed = resp("http://t/", &[("content-security-policy", "frame-ancestors 'none'")]);
        assert!(missing_protections(&framed).is_empty());

        let xfo_only = resp("http://t/", &[("x-frame-options", "DENY")]);
        assert_eq!(missing_protections(&xfo_only), vec![CONTENT_SECURITY_POLICY]);
    }

    #[test]
    fn test_audit_reports_once_per_origin() {
        let audit = HeaderAudit::new();
        let first = audit.check(&resp("http://shop.test/a", &[]));
        assert_eq!(first.len(), 2);
        assert!(first
            .iter()
            .all(|f| f.status == FindingStatus::Potential && f.severity == Severity::Low));
        assert!(audit.check(&resp("http://shop.test/b?x=1", &[])).is_empty());
        assert_eq!(audit.check(&resp("http://other.test/", &[])).len(), 2);
    }
}
