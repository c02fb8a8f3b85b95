//! Core data models used throughout the harvest pipeline.
//!
//! These types represent the catalogue records, service references, WMS
//! capability trees, and match/validation outcomes that flow from the
//! harvester through to the CSV sink.

use std::fmt;
use std::path::PathBuf;

/// The OGC service family and operation a URL points at.
///
/// Classification is pure and total: every URL maps to exactly one
/// variant, with [`ServiceType::Unknown`] as the catch-all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceType {
    WmsCapabilities,
    WmsGetMap,
    WcsDescribeCoverage,
    WcsGetCoverage,
    WfsCapabilities,
    WfsGetFeature,
    Unknown,
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceType::WmsCapabilities => "WMS:GetCapabilities",
            ServiceType::WmsGetMap => "WMS:GetMap",
            ServiceType::WcsDescribeCoverage => "WCS:DescribeCoverage",
            ServiceType::WcsGetCoverage => "WCS:GetCoverage",
            ServiceType::WfsCapabilities => "WFS:GetCapabilities",
            ServiceType::WfsGetFeature => "WFS:GetFeature",
            ServiceType::Unknown => "Unknown",
        };
        write!(f, "{}", s)
    }
}

/// A URL found in a catalogue record's references, with its inferred type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceReference {
    pub url: String,
    pub service_type: ServiceType,
}

/// One metadata record parsed from a CSW GetRecords page.
///
/// Owned by the page job that produced it and discarded once flattened
/// into [`crate::sink::HarvestRow`]s.
#[derive(Debug, Clone, Default)]
pub struct CatalogRecord {
    pub identifier: Option<String>,
    pub title: Option<String>,
    pub abstract_text: Option<String>,
    pub publisher: Option<String>,
    pub modified: Option<String>,
    /// Subject keywords. Empty entries are filtered out at parse time.
    pub subjects: Vec<String>,
    pub references: Vec<ServiceReference>,
}

/// An axis-aligned bounding box, coordinate meaning given by context.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bbox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl fmt::Display for Bbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {})",
            self.min_x, self.min_y, self.max_x, self.max_y
        )
    }
}

/// A bounding box in the layer's native spatial reference system.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeBbox {
    pub bbox: Bbox,
    /// SRS/CRS code, e.g. `EPSG:27700`. May be empty if the capabilities
    /// document omitted it; an empty code makes the layer not requestable.
    pub srs: String,
}

impl fmt::Display for NativeBbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {}, {})",
            self.bbox.min_x, self.bbox.min_y, self.bbox.max_x, self.bbox.max_y, self.srs
        )
    }
}

/// One layer from a WMS capabilities document.
///
/// A layer with both `<Name>` and `<Title>` is a named layer that GetMap
/// requests can target. A layer with a title only is a category layer
/// grouping other layers; it cannot be requested independently.
#[derive(Debug, Clone)]
pub struct Layer {
    pub name: Option<String>,
    pub title: String,
    pub native: Option<NativeBbox>,
    pub wgs84: Option<Bbox>,
}

impl Layer {
    pub fn is_named(&self) -> bool {
        self.name.is_some()
    }
}

/// Parsed WMS capabilities: service metadata plus layers in document order.
#[derive(Debug, Clone, Default)]
pub struct ServiceCapabilities {
    pub access_constraints: Option<String>,
    pub layers: Vec<Layer>,
}

/// Outcome of matching a record title against a service's named layers.
#[derive(Debug, Clone)]
pub struct LayerMatch {
    pub title: Option<String>,
    pub name: Option<String>,
    /// Levenshtein distance between the record title and the matched
    /// layer title, both lower-cased. `-1` means no match was produced.
    pub distance: i64,
    pub exact: bool,
    /// True iff the service enumerated exactly one named layer,
    /// regardless of the match outcome.
    pub single_choice: bool,
    pub capabilities_fetch_error: bool,
    pub access_constraints: Option<String>,
    pub native_bbox: Option<NativeBbox>,
    pub wgs84_bbox: Option<Bbox>,
}

impl LayerMatch {
    /// A null match recording that the capabilities fetch failed.
    pub fn fetch_error() -> Self {
        LayerMatch {
            capabilities_fetch_error: true,
            ..LayerMatch::empty()
        }
    }

    pub fn empty() -> Self {
        LayerMatch {
            title: None,
            name: None,
            distance: -1,
            exact: false,
            single_choice: false,
            capabilities_fetch_error: false,
            access_constraints: None,
            native_bbox: None,
            wgs84_bbox: None,
        }
    }
}

/// Classification of the image returned by a sample GetMap request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStatus {
    DoesNotExist,
    ZeroSize,
    Invalid,
    Populated,
    BackgroundOnly,
}

impl fmt::Display for ImageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ImageStatus::DoesNotExist => "image does not exist",
            ImageStatus::ZeroSize => "zero-size image",
            ImageStatus::Invalid => "invalid",
            ImageStatus::Populated => "seems to be populated",
            ImageStatus::BackgroundOnly => "seems to all be background / no features in extent",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of validating a resolved layer with a sample render request.
///
/// Every branch of the validator produces one of these; nothing is raised
/// past the validator boundary.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    /// True if a GetMap request was actually issued.
    pub attempted: bool,
    pub getmap_error: bool,
    pub image_path: Option<PathBuf>,
    pub status: Option<ImageStatus>,
}

impl ValidationResult {
    /// Validator was not invoked (no matched layer, or no usable SRS).
    pub fn skipped() -> Self {
        ValidationResult {
            attempted: false,
            getmap_error: false,
            image_path: None,
            status: None,
        }
    }
}
