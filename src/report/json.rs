//! JSON export of a whole crawl result

use crate::error::Result;
use crate::models::ScanResult;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tracing::info;

/// Writes `result` as pretty-printed JSON, creating missing parent directories
pub fn export(result: &ScanResult, output_path: &Path) -> Result<()> {
    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(output_path)?);
    serde_json::to_writer_pretty(&mut writer, result)?;
    writer.flush()?;
    info!(
        "Crawl {} with {} findings saved to {}",
        result.scan_id,
        result.findings.len(),
        output_path.display()
    );
    Ok(())
}

/// Reads back a result written by [`export`]
pub fn load(input_path: &Path) -> Result<ScanResult> {
    let reader = BufReader::new(File::open(input_path)?);
    Ok(serde_json::from_reader(reader)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Finding, RunStatus};

    #[test]
    fn test_export_then_load() {
        let mut result = ScanResult::new("http://shop.test/");
        result
            .findings
            .push(Finding::missing_protection("http://shop.test", "X-Frame-Options"));
        result.urls_visited = 4;
        result.finish(RunStatus::Idle);

        let path = std::env::temp_dir()
            .join(format!("sqlspider-{}", result.scan_id))
            .join("result.json");
        export(&result, &path).expect("export");
        let loaded = load(&path).expect("load");
        let _ = std::fs::remove_dir_all(path.parent().expect("parent"));

        assert_eq!(loaded.scan_id, result.scan_id);
        assert_eq!(loaded.status, RunStatus::Idle);
        assert_eq!(loaded.urls_visited, 4);
        assert_eq!(loaded.findings.len(), 1);
        assert_eq!(loaded.findings[0].detail, result.findings[0].detail);
    }
}
