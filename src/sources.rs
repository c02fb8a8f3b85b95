//! Catalogue endpoint lists: load them from CSV and pre-flight them.
//!
//! An endpoint list is a CSV with a `url` column; extra columns are
//! ignored. `check_sources` probes every listed catalogue and writes the
//! reachable ones to a sibling `<name>_valid.csv` so a long harvest run
//! never burns time on dead endpoints.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::csw::CatalogueClient;

/// Outcome of probing a single listed endpoint.
#[derive(Debug)]
pub struct SourceCheck {
    pub url: String,
    pub ok: bool,
    /// Records the catalogue advertises, when the probe succeeded.
    pub total_matches: Option<u64>,
    pub error: Option<String>,
}

/// Result of a full `check_sources` pass.
#[derive(Debug)]
pub struct SourceReport {
    pub checks: Vec<SourceCheck>,
    /// Where the filtered list was written.
    pub output_csv: PathBuf,
}

impl SourceReport {
    pub fn ok_count(&self) -> usize {
        self.checks.iter().filter(|c| c.ok).count()
    }
}

/// Read catalogue URLs from the `url` column of a CSV file.
///
/// Blank cells are skipped; order is preserved.
pub fn load_endpoint_list(path: &Path) -> Result<Vec<String>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open endpoint list {}", path.display()))?;

    let headers = reader.headers()?.clone();
    let url_index = headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case("url"))
        .with_context(|| format!("{} has no `url` column", path.display()))?;

    let mut urls = Vec::new();
    for record in reader.records() {
        let record = record?;
        if let Some(cell) = record.get(url_index) {
            let url = cell.trim();
            if !url.is_empty() {
                urls.push(url.to_string());
            }
        }
    }

    if urls.is_empty() {
        bail!("{} contains no endpoint URLs", path.display());
    }
    Ok(urls)
}

/// Path of the filtered list written next to the input file.
fn valid_list_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "sources".to_string());
    input.with_file_name(format!("{}_valid.csv", stem))
}

/// Probe every endpoint in `input` and write the reachable ones to a
/// sibling `<name>_valid.csv` with the same single `url` column.
pub async fn check_sources(
    catalogue: &dyn CatalogueClient,
    input: &Path,
) -> Result<SourceReport> {
    let urls = load_endpoint_list(input)?;
    let mut checks = Vec::with_capacity(urls.len());

    for url in urls {
        match catalogue.probe(&url).await {
            Ok(probe) => {
                info!(endpoint = url.as_str(), total = probe.total_matches, "endpoint OK");
                checks.push(SourceCheck {
                    url,
                    ok: true,
                    total_matches: Some(probe.total_matches),
                    error: None,
                });
            }
            Err(e) => {
                warn!(endpoint = url.as_str(), error = %e, "endpoint not usable");
                checks.push(SourceCheck {
                    url,
                    ok: false,
                    total_matches: None,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    let output_csv = valid_list_path(input);
    let mut writer = csv::Writer::from_path(&output_csv)
        .with_context(|| format!("failed to create {}", output_csv.display()))?;
    writer.write_record(["url"])?;
    for check in checks.iter().filter(|c| c.ok) {
        writer.write_record([check.url.as_str()])?;
    }
    writer.flush()?;

    Ok(SourceReport { checks, output_csv })
}
