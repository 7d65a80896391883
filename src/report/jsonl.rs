//! JSON Lines export: one flat record per finding, for log pipelines and grep

use crate::error::Result;
use crate::models::{
    Confidence, Dbms, Finding, FindingDetail, FindingStatus, HttpMethod, ScanResult, Severity,
    Technique, VulnType,
};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

/// A finding without nesting. Fields that do not apply to its kind are omitted.
#[derive(Debug, Serialize)]
struct FindingRecord<'a> {
    scan_id: &'a str,
    target: &'a str,
    found_at: String,
    kind: VulnType,
    severity: Severity,
    confidence: Confidence,
    status: FindingStatus,
    method: HttpMethod,
    url: &'a str,
    endpoint: &'a str,
    title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameter: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<&'a str>,
    #[serde(skip_serializing_if = "is_empty")]
    techniques: &'a [Technique],
    #[serde(skip_serializing_if = "Option::is_none")]
    dbms: Option<Dbms>,
    #[serde(skip_serializing_if = "Option::is_none")]
    waf_detected: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    db_version: Option<&'a str>,
    #[serde(skip_serializing_if = "is_empty")]
    tables: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    missing_header: Option<&'a str>,
    /// Evidence split back into its individual lines
    evidence: Vec<&'a str>,
}

fn is_empty<T>(list: &&[T]) -> bool {
    list.is_empty()
}

impl<'a> FindingRecord<'a> {
    fn new(result: &'a ScanResult, finding: &'a Finding) -> Self {
        let mut record = Self {
            scan_id: &result.scan_id,
            target: &result.target,
            found_at: finding.found_at.to_rfc3339(),
            kind: finding.vuln_type(),
            severity: finding.severity,
            confidence: finding.confidence,
            status: finding.status,
            method: finding.method,
            url: &finding.url,
            endpoint: &finding.endpoint,
            title: &finding.title,
            parameter: None,
            payload: None,
            techniques: &[],
            dbms: None,
            waf_detected: None,
            db_version: None,
            tables: &[],
            missing_header: None,
            evidence: finding
                .evidence
                .split("; ")
                .filter(|line| !line.is_empty())
                .collect(),
        };
        match &finding.detail {
            FindingDetail::SqlInjection(d) => {
                record.parameter = Some(d.parameter.as_str());
                record.payload = Some(d.payload.as_str());
                record.techniques = &d.techniques;
                record.dbms = Some(d.dbms);
                record.waf_detected = Some(d.waf_detected);
                record.db_version = d
                    .exploit_info
                    .version
                    .as_deref()
                    .or(d.exploit_info.blind_version.as_deref());
                record.tables = &d.exploit_info.tables;
            }
            FindingDetail::MissingProtection { header } => {
                record.missing_header = Some(header.as_str());
            }
        }
        record
    }
}

/// Writes one line per finding of `result`
pub fn export(result: &ScanResult, output_path: &Path) -> Result<()> {
    let mut writer = BufWriter::new(File::create(output_path)?);
    for finding in &result.findings {
        serde_json::to_writer(&mut writer, &FindingRecord::new(result, finding))?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    info!(
        "{} finding lines written to {}",
        result.findings.len(),
        output_path.display()
    );
    Ok(())
}
