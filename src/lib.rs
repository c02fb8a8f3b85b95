//! # WMS Harvest
//!
//! A harvest pipeline for OGC geospatial catalogues.
//!
//! WMS Harvest walks CSW catalogue endpoints page by page, classifies
//! each record's reference URLs by OGC service type, resolves WMS
//! references to the named layer whose title best matches the record
//! title, optionally validates the resolved layer with a sample GetMap
//! render, and flattens everything into a single CSV.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌───────────────┐
//! │ CSW probe    │──▶│  Page jobs     │──▶│ Worker pool   │
//! │ per endpoint │   │ (offset, size) │   │ fetch/classify │
//! └──────────────┘   └───────────────┘   │ resolve/render │
//!                                        └───────┬───────┘
//!                                                │ batches
//!                                                ▼
//!                                        ┌───────────────┐
//!                                        │ Writer task   │
//!                                        │ wms_layers.csv │
//!                                        └───────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! wmsh harvest --csw-url https://example.org/csw --out-dir ./out
//! wmsh harvest --csw-list sources.csv --out-dir ./out --limit 50
//! wmsh check-sources sources.csv
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`classify`] | Reference URL classification |
//! | [`csw`] | CSW catalogue client and GetRecords parsing |
//! | [`wms`] | WMS client, capabilities parsing, GetMap URLs |
//! | [`matcher`] | Title matching over named layers |
//! | [`validate`] | Sample render validation |
//! | [`pipeline`] | Worker pool and run orchestration |
//! | [`sink`] | CSV flattening and single-writer sink |
//! | [`sources`] | Endpoint lists and pre-flight checks |

pub mod classify;
pub mod config;
pub mod csw;
pub mod error;
pub mod matcher;
pub mod models;
pub mod pipeline;
pub mod sink;
pub mod sources;
pub mod validate;
pub mod wms;
