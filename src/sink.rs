//! Result aggregation: flatten match tuples into rows and append them to
//! the single output CSV.
//!
//! The sink is owned by exactly one writer task; the header is written
//! once at creation and each row is serialized whole, so concurrent page
//! jobs can never interleave partial rows.

use anyhow::{Context, Result};
use csv::{QuoteStyle, WriterBuilder};
use serde::Serialize;
use std::fs::File;
use std::path::Path;
use url::Url;

use crate::models::{CatalogRecord, LayerMatch, ServiceReference, ValidationResult};

/// Output filename within the run's output directory.
pub const OUTPUT_CSV: &str = "wms_layers.csv";

/// Column order of the output file. Written once per sink lifetime.
pub const CSV_COLUMNS: &[&str] = &[
    "csw_url",
    "record_identifier",
    "record_publisher",
    "record_title",
    "record_subjects",
    "record_abstract",
    "record_modified",
    "wms_url",
    "wms_url_domain",
    "matched_layer_title",
    "matched_layer_name",
    "access_constraints",
    "single_choice",
    "match_distance",
    "bbox_wgs84",
    "bbox_native",
    "capabilities_fetch_error",
    "getmap_error",
    "getmap_attempted",
    "image_status",
    "image_path",
];

/// One CSV-serializable output row: the join of a record, one matching
/// service reference, its layer match, and its validation result.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HarvestRow {
    pub csw_url: String,
    pub record_identifier: String,
    pub record_publisher: String,
    pub record_title: String,
    pub record_subjects: String,
    pub record_abstract: String,
    pub record_modified: String,
    pub wms_url: String,
    pub wms_url_domain: String,
    pub matched_layer_title: String,
    pub matched_layer_name: String,
    pub access_constraints: String,
    pub single_choice: bool,
    pub match_distance: i64,
    pub bbox_wgs84: String,
    pub bbox_native: String,
    pub capabilities_fetch_error: bool,
    pub getmap_error: bool,
    pub getmap_attempted: bool,
    pub image_status: String,
    pub image_path: String,
}

/// Flatten one (record, reference, match, validation) tuple into a row.
pub fn flatten_row(
    csw_url: &str,
    record: &CatalogRecord,
    reference: &ServiceReference,
    layer_match: &LayerMatch,
    validation: &ValidationResult,
) -> HarvestRow {
    HarvestRow {
        csw_url: csw_url.to_string(),
        record_identifier: record.identifier.clone().unwrap_or_default(),
        record_publisher: record.publisher.clone().unwrap_or_default(),
        record_title: record.title.clone().unwrap_or_default(),
        record_subjects: record.subjects.join(", "),
        record_abstract: record.abstract_text.clone().unwrap_or_default(),
        record_modified: record.modified.clone().unwrap_or_default(),
        wms_url: reference.url.clone(),
        wms_url_domain: url_domain(&reference.url).unwrap_or_default(),
        matched_layer_title: layer_match.title.clone().unwrap_or_default(),
        matched_layer_name: layer_match.name.clone().unwrap_or_default(),
        access_constraints: layer_match.access_constraints.clone().unwrap_or_default(),
        single_choice: layer_match.single_choice,
        match_distance: layer_match.distance,
        bbox_wgs84: layer_match
            .wgs84_bbox
            .map(|b| b.to_string())
            .unwrap_or_default(),
        bbox_native: layer_match
            .native_bbox
            .as_ref()
            .map(|b| b.to_string())
            .unwrap_or_default(),
        capabilities_fetch_error: layer_match.capabilities_fetch_error,
        getmap_error: validation.getmap_error,
        getmap_attempted: validation.attempted,
        image_status: validation
            .status
            .map(|s| s.to_string())
            .unwrap_or_default(),
        image_path: validation
            .image_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
    }
}

/// The host (and port, if any) of a service URL.
pub fn url_domain(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Append-only CSV sink. Double-quotes all non-numeric fields.
pub struct CsvSink {
    writer: csv::Writer<File>,
}

impl CsvSink {
    /// Create the output file and write the header row.
    pub fn create(path: &Path) -> Result<Self> {
        let mut writer = WriterBuilder::new()
            .quote_style(QuoteStyle::NonNumeric)
            .has_headers(false)
            .from_path(path)
            .with_context(|| format!("Failed to create output file: {}", path.display()))?;
        writer.write_record(CSV_COLUMNS)?;
        writer.flush()?;
        Ok(CsvSink { writer })
    }

    /// Append a completed batch of rows.
    pub fn append(&mut self, rows: &[HarvestRow]) -> Result<()> {
        for row in rows {
            self.writer.serialize(row)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
