//! Core data models for the spider

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Severity level for findings
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Critical => write!(f, "CRITICAL"),
            Severity::High => write!(f, "HIGH"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::Low => write!(f, "LOW"),
            Severity::Info => write!(f, "INFO"),
        }
    }
}

/// Confidence level for a finding
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Confidence {
    /// Several independent techniques agree, or data was extracted
    Confirmed,
    /// A single technique produced the evidence
    Tentative,
    /// Observation only (missing header and the like)
    Informational,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Confidence::Confirmed => write!(f, "confirmed"),
            Confidence::Tentative => write!(f, "tentative"),
            Confidence::Informational => write!(f, "informational"),
        }
    }
}

/// HTTP method of an attack surface
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    /// Parses a form `method` attribute; anything but POST is GET
    pub fn from_form_attr(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_uppercase()) {
            Some(ref v) if v == "POST" => HttpMethod::Post,
            _ => HttpMethod::Get,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an attack surface was discovered
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SurfaceSource {
    /// Query string of the fetched page itself
    QueryString,
    Form,
    Link,
}

/// A (action URL, method, parameter set) tuple that accepts external input
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct AttackSurface {
    /// Absolute action URL without query string or fragment
    pub action: String,
    pub method: HttpMethod,
    /// Parameter names in document order
    pub parameters: Vec<String>,
    /// Values sent alongside the parameter under test
    pub original_values: BTreeMap<String, String>,
    pub source: SurfaceSource,
}

impl AttackSurface {
    /// Deduplication key of one parameter of this surface
    pub fn key(&self, parameter: &str) -> SurfaceKey {
        SurfaceKey {
            action: self.action.clone(),
            parameter: parameter.to_string(),
            method: self.method,
        }
    }
}

/// Identity of a (surface, parameter) pair for "tested once per run" bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceKey {
    pub action: String,
    pub parameter: String,
    pub method: HttpMethod,
}

/// An HTTP response captured for comparison and evidence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapturedResponse {
    pub status: u16,
    /// Header names are lowercased; repeated headers are joined with ", "
    pub headers: HashMap<String, String>,
    pub body: String,
    pub url: String,
    pub elapsed_ms: u64,
}

impl CapturedResponse {
    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|v| v.as_str())
    }

    pub fn is_html(&self) -> bool {
        match self.header("content-type") {
            Some(ct) => {
                let ct = ct.to_ascii_lowercase();
                ct.contains("text/html") || ct.contains("application/xhtml")
            }
            None => true,
        }
    }
}

/// Database engine behind a target
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Dbms {
    #[serde(rename = "MySQL")]
    MySql,
    #[serde(rename = "PostgreSQL")]
    PostgreSql,
    #[serde(rename = "MSSQL")]
    MsSql,
    Oracle,
    #[serde(rename = "SQLite")]
    Sqlite,
    Unknown,
}

impl Dbms {
    /// Trailing comment used to neutralize the rest of the original query
    pub fn comment(&self) -> &'static str {
        match self {
            Dbms::MySql => "#",
            Dbms::Oracle => "",
            Dbms::PostgreSql | Dbms::MsSql | Dbms::Sqlite | Dbms::Unknown => "-- ",
        }
    }
}

impl fmt::Display for Dbms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dbms::MySql => "MySQL",
            Dbms::PostgreSql => "PostgreSQL",
            Dbms::MsSql => "MSSQL",
            Dbms::Oracle => "Oracle",
            Dbms::Sqlite => "SQLite",
            Dbms::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// SQL injection detection technique
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Technique {
    #[serde(rename = "Error-based")]
    ErrorBased,
    #[serde(rename = "Boolean-based")]
    BooleanBased,
    #[serde(rename = "Time-based")]
    TimeBased,
    #[serde(rename = "Union-based")]
    UnionBased,
}

impl fmt::Display for Technique {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Technique::ErrorBased => "Error-based",
            Technique::BooleanBased => "Boolean-based",
            Technique::TimeBased => "Time-based",
            Technique::UnionBased => "Union-based",
        };
        f.write_str(name)
    }
}

/// How far a finding was taken
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FindingStatus {
    Potential,
    Confirmed,
    Exploited,
}

impl fmt::Display for FindingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FindingStatus::Potential => write!(f, "Potential"),
            FindingStatus::Confirmed => write!(f, "Confirmed"),
            FindingStatus::Exploited => write!(f, "Exploited"),
        }
    }
}

/// Vulnerability class of a finding
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum VulnType {
    SqlInjection,
    MissingProtection,
}

impl fmt::Display for VulnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VulnType::SqlInjection => write!(f, "SQL Injection"),
            VulnType::MissingProtection => write!(f, "Missing Protection"),
        }
    }
}

/// Metadata pulled out of the database as proof of exploitability
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExploitInfo {
    pub version: Option<String>,
    #[serde(default)]
    pub tables: Vec<String>,
    /// Table name -> column names
    #[serde(default)]
    pub columns: BTreeMap<String, Vec<String>>,
    /// Version string recovered one character at a time through the boolean oracle
    pub blind_version: Option<String>,
}

impl ExploitInfo {
    pub fn is_empty(&self) -> bool {
        self.version.is_none()
            && self.tables.is_empty()
            && self.columns.is_empty()
            && self.blind_version.is_none()
    }
}

/// Technique-specific part of a SQL injection finding
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SqlInjectionDetail {
    pub parameter: String,
    /// Payload that produced the primary evidence
    pub payload: String,
    /// First technique that confirmed the injection
    pub technique: Technique,
    /// Every technique that produced evidence, in confirmation order
    pub techniques: Vec<Technique>,
    pub dbms: Dbms,
    pub exploit_info: ExploitInfo,
    pub waf_detected: bool,
}

/// Variant data of a finding
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum FindingDetail {
    SqlInjection(SqlInjectionDetail),
    MissingProtection { header: String },
}

/// A vulnerability reported by the spider. Never mutated after emission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Unique identifier
    pub id: String,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub confidence: Confidence,
    pub status: FindingStatus,
    /// URL carrying the payload for GET, the action URL for POST
    pub endpoint: String,
    /// Action URL of the affected surface
    pub url: String,
    pub method: HttpMethod,
    /// Evidence lines joined with "; "
    pub evidence: String,
    pub recommendation: String,
    pub cwe_id: Option<String>,
    pub owasp_category: Option<String>,
    pub found_at: DateTime<Local>,
    pub detail: FindingDetail,
}

impl Finding {
    /// Builds a SQL injection finding from the confirmation outcome
    pub fn sql_injection(
        endpoint: impl Into<String>,
        url: impl Into<String>,
        method: HttpMethod,
        status: FindingStatus,
        evidence: &[String],
        detail: SqlInjectionDetail,
    ) -> Self {
        let confidence = if detail.techniques.len() >= 2 || status == FindingStatus::Exploited {
            Confidence::Confirmed
        } else {
            Confidence::Tentative
        };
        let techniques = detail
            .techniques
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let mut description = format!(
            "Parameter '{}' is vulnerable to SQL injection ({techniques}). Backend: {}.",
            detail.parameter, detail.dbms
        );
        if confidence == Confidence::Tentative {
            description.push_str(" Single-technique finding; review the evidence for a false positive.");
        }
        let evidence = if evidence.is_empty() {
            format!("Vulnerability confirmed via {}.", detail.technique)
        } else {
            evidence.join("; ")
        };

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: format!("SQL Injection ({}) in '{}'", detail.technique, detail.parameter),
            description,
            severity: Severity::Critical,
            confidence,
            status,
            endpoint: endpoint.into(),
            url: url.into(),
            method,
            evidence,
            recommendation: "Use parameterized queries or prepared statements.".to_string(),
            cwe_id: Some("CWE-89".to_string()),
            owasp_category: Some("A03:2021 Injection".to_string()),
            found_at: Local::now(),
            detail: FindingDetail::SqlInjection(detail),
        }
    }

    /// Builds a finding for a security header absent from a response
    pub fn missing_protection(url: impl Into<String>, header: impl Into<String>) -> Self {
        let url = url.into();
        let header = header.into();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: format!("Missing {header} header"),
            description: format!("Responses from this origin do not set {header}."),
            severity: Severity::Low,
            confidence: Confidence::Informational,
            status: FindingStatus::Potential,
            endpoint: url.clone(),
            url,
            method: HttpMethod::Get,
            evidence: format!("{header} absent from response headers"),
            recommendation: format!("Send a restrictive {header} header on every HTML response."),
            cwe_id: Some("CWE-693".to_string()),
            owasp_category: Some("A05:2021 Security Misconfiguration".to_string()),
            found_at: Local::now(),
            detail: FindingDetail::MissingProtection { header },
        }
    }

    pub fn vuln_type(&self) -> VulnType {
        match self.detail {
            FindingDetail::SqlInjection(_) => VulnType::SqlInjection,
            FindingDetail::MissingProtection { .. } => VulnType::MissingProtection,
        }
    }

    pub fn technique(&self) -> Option<Technique> {
        match &self.detail {
            FindingDetail::SqlInjection(d) => Some(d.technique),
            FindingDetail::MissingProtection { .. } => None,
        }
    }

    pub fn parameter(&self) -> Option<&str> {
        match &self.detail {
            FindingDetail::SqlInjection(d) => Some(d.parameter.as_str()),
            FindingDetail::MissingProtection { .. } => None,
        }
    }
}

/// A URL waiting to be crawled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlQueueItem {
    pub url: String,
    /// Link distance from the seed URL
    pub depth: u32,
}

/// Lifecycle of a crawl run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RunStatus {
    Idle,
    Running,
    Stopped,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Idle => write!(f, "Idle"),
            RunStatus::Running => write!(f, "Running"),
            RunStatus::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Snapshot of the run's monitoring counters
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LiveStats {
    pub urls_crawled: u64,
    pub params_fuzzed: u64,
    pub payloads_tested: u64,
    pub avg_resp_time_ms: u64,
    pub per_category: BTreeMap<String, u64>,
}

/// Heuristic thresholds used by the detection techniques
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionTuning {
    /// Relative body-length tolerance for "response differs from baseline"
    pub diff_tolerance: f64,
    /// Tighter tolerance for comparing the two halves of a boolean pair
    pub pair_tolerance: f64,
    /// Absolute body-length floor below which lengths count as near-equal
    pub length_floor: usize,
    /// Extra delay over the baseline that confirms a time-based probe
    pub time_delay_threshold_ms: u64,
    /// Baseline latency never assumed lower than this
    pub min_baseline_ms: u64,
    /// Delays within this margin of the request timeout are discarded
    pub timeout_margin_ms: u64,
    /// Minimum delay for a sleep-style fingerprint probe to match
    pub fingerprint_delay_floor_ms: u64,
    pub fingerprint_timeout_margin_ms: u64,
    pub max_union_columns: usize,
    pub blind_max_len: usize,
}

impl Default for DetectionTuning {
    fn default() -> Self {
        Self {
            diff_tolerance: 0.10,
            pair_tolerance: 0.05,
            length_floor: 30,
            time_delay_threshold_ms: 4000,
            min_baseline_ms: 500,
            timeout_margin_ms: 1000,
            fingerprint_delay_floor_ms: 4500,
            fingerprint_timeout_margin_ms: 500,
            max_union_columns: 25,
            blind_max_len: 32,
        }
    }
}

/// Options for a crawl run (the `start` message)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpiderOptions {
    /// Seed URL
    pub url: String,
    /// Maximum link depth from the seed
    pub depth: u32,
    /// Concurrent page workers
    pub threads: usize,
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
    /// "default" for the built-in payloads, otherwise a payload file path
    pub payload_set: String,
    pub error_based: bool,
    pub boolean_based: bool,
    pub time_based: bool,
    pub union_based: bool,
    /// Keep stacking evidence from later techniques after the first confirmation
    pub advanced_mode: bool,
    /// Only enqueue links on the seed's origin
    pub same_domain: bool,
    /// Test form surfaces
    pub follow_forms: bool,
    pub max_queue_size: usize,
    pub mutate_payloads: bool,
    /// Fixed seed for reproducible payload mutation
    pub mutation_seed: Option<u64>,
    pub waf_detection: bool,
    pub blind_extraction: bool,
    pub header_checks: bool,
    /// Throttle between crawl iterations
    pub delay_ms: u64,
    /// Maximum requests per second
    pub rate_limit: Option<u32>,
    pub user_agent: String,
    /// HTTP/HTTPS proxy URL
    pub proxy: Option<String>,
    /// Custom HTTP headers
    pub headers: HashMap<String, String>,
    /// Render pages in headless Chromium (requires the `browser` feature)
    pub render: bool,
    pub render_wait_ms: u64,
    pub tuning: DetectionTuning,
}

impl Default for SpiderOptions {
    fn default() -> Self {
        Self {
            url: String::new(),
            depth: 3,
            threads: 3,
            timeout_ms: 20_000,
            payload_set: "default".to_string(),
            error_based: true,
            boolean_based: true,
            time_based: true,
            union_based: true,
            advanced_mode: true,
            same_domain: true,
            follow_forms: true,
            max_queue_size: 1000,
            mutate_payloads: true,
            mutation_seed: None,
            waf_detection: true,
            blind_extraction: false,
            header_checks: false,
            delay_ms: 0,
            rate_limit: None,
            user_agent: "SQLi-Spider/1.4".to_string(),
            proxy: None,
            headers: HashMap::new(),
            render: false,
            render_wait_ms: 2000,
            tuning: DetectionTuning::default(),
        }
    }
}

/// Outcome of a complete crawl run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub target: String,
    pub scan_id: String,
    pub started_at: DateTime<Local>,
    pub finished_at: Option<DateTime<Local>>,
    pub status: RunStatus,
    pub findings: Vec<Finding>,
    pub stats: LiveStats,
    pub total_requests: u64,
    pub urls_visited: usize,
}

impl ScanResult {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            scan_id: uuid::Uuid::new_v4().to_string(),
            started_at: Local::now(),
            finished_at: None,
            status: RunStatus::Running,
            findings: Vec::new(),
            stats: LiveStats::default(),
            total_requests: 0,
            urls_visited: 0,
        }
    }

    /// Returns count of findings by severity
    pub fn count_by_severity(&self, severity: Severity) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == severity)
            .count()
    }

    /// Marks the run as finished with its terminal status
    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.finished_at = Some(Local::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detail(techniques: Vec<Technique>) -> SqlInjectionDetail {
        SqlInjectionDetail {
            parameter: "id".to_string(),
            payload: "'".to_string(),
            technique: techniques[0],
            techniques,
            dbms: Dbms::MySql,
            exploit_info: ExploitInfo::default(),
            waf_detected: false,
        }
    }

    #[test]
    fn test_single_technique_is_tentative() {
        let finding = Finding::sql_injection(
            "http://t/p?id=%27",
            "http://t/p",
            HttpMethod::Get,
            FindingStatus::Confirmed,
            &["Error detected".to_string()],
            detail(vec![Technique::ErrorBased]),
        );
        assert_eq!(finding.confidence, Confidence::Tentative);
        assert_eq!(finding.technique(), Some(Technique::ErrorBased));
        assert_eq!(finding.parameter(), Some("id"));
        assert_eq!(finding.vuln_type(), VulnType::SqlInjection);
    }

    #[test]
    fn test_stacked_techniques_are_confirmed() {
        let finding = Finding::sql_injection(
            "http://t/p",
            "http://t/p",
            HttpMethod::Post,
            FindingStatus::Confirmed,
            &[],
            detail(vec![Technique::BooleanBased, Technique::TimeBased]),
        );
        assert_eq!(finding.confidence, Confidence::Confirmed);
        assert_eq!(finding.evidence, "Vulnerability confirmed via Boolean-based.");
    }

    #[test]
    fn test_technique_serializes_with_display_name() {
        let json = serde_json::to_string(&Technique::ErrorBased).expect("serialize");
        assert_eq!(json, "\"Error-based\"");
        let json = serde_json::to_string(&Dbms::PostgreSql).expect("serialize");
        assert_eq!(json, "\"PostgreSQL\"");
    }

    #[test]
    fn test_form_method_parsing() {
        assert_eq!(HttpMethod::from_form_attr(Some("post")), HttpMethod::Post);
        assert_eq!(HttpMethod::from_form_attr(Some(" POST ")), HttpMethod::Post);
        assert_eq!(HttpMethod::from_form_attr(Some("put")), HttpMethod::Get);
        assert_eq!(HttpMethod::from_form_attr(None), HttpMethod::Get);
    }

    #[test]
    fn test_comment_styles() {
        assert_eq!(Dbms::MySql.comment(), "#");
        assert_eq!(Dbms::Oracle.comment(), "");
        assert_eq!(Dbms::Unknown.comment(), "-- ");
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "text/html; charset=utf-8".to_string());
        let resp = CapturedResponse {
            status: 200,
            headers,
            body: String::new(),
            url: "http://t/".to_string(),
            elapsed_ms: 3,
        };
        assert_eq!(resp.header("Content-Type"), Some("text/html; charset=utf-8"));
        assert!(resp.is_html());
    }
}
