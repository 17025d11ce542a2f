//! Publishing run reports as JSON.

use crate::error::{Result, ResultExt, TomoflowError};
use crate::pipeline::RunReport;
use std::io::Write;
use std::path::Path;

/// Write `report` as pretty JSON to `path`, or to stdout when `path` is `None`.
pub fn publish(report: &RunReport, path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => save(report, path),
        None => {
            let mut stdout = std::io::stdout().lock();
            write_json(report, &mut stdout)
        }
    }
}

/// Write `report` to a file, creating parent directories as needed.
pub fn save(report: &RunReport, path: &Path) -> Result<()> {
    let json = report.to_json()?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(TomoflowError::from)
            .with_context(|| format!("Failed to create report directory {}", parent.display()))?;
    }
    std::fs::write(path, json)
        .map_err(TomoflowError::from)
        .with_context(|| format!("Failed to write report to {}", path.display()))
}

pub fn write_json(report: &RunReport, out: &mut dyn Write) -> Result<()> {
    let json = report.to_json()?;
    writeln!(out, "{}", json)?;
    out.flush()?;
    Ok(())
}
