//! CSW catalogue client: paginated GetRecords harvesting.
//!
//! Speaks CSW 2.0.2 `GetRecords` (POST, `ElementSetName` full) and parses
//! the Dublin Core record set out of the response. The [`CatalogueClient`]
//! trait is the seam the pipeline schedules against; [`CswClient`] is the
//! HTTP implementation.

use anyhow::Result;
use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::debug;

use crate::classify::classify;
use crate::error::CatalogueError;
use crate::models::{CatalogRecord, ServiceReference};

/// What an initial page request at offset 0 taught us about a catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    pub total_matches: u64,
    /// Effective page size: what the server actually returned for the
    /// requested size, floored at 1.
    pub page_size: u64,
}

/// A catalogue endpoint exposing paged record search.
#[async_trait]
pub trait CatalogueClient: Send + Sync {
    /// Issue an initial page request to learn the total match count and
    /// the effective page size.
    async fn probe(&self, endpoint: &str) -> Result<ProbeResult, CatalogueError>;

    /// Fetch one page of records starting at `offset`.
    async fn fetch_page(
        &self,
        endpoint: &str,
        offset: u64,
        page_size: u64,
    ) -> Result<Vec<CatalogRecord>, CatalogueError>;
}

/// HTTP implementation of [`CatalogueClient`] over CSW 2.0.2.
pub struct CswClient {
    http: reqwest::Client,
    page_size: u64,
}

impl CswClient {
    pub fn new(timeout: Duration, page_size: u64) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(CswClient {
            http,
            page_size: page_size.max(1),
        })
    }

    async fn get_records(
        &self,
        endpoint: &str,
        offset: u64,
        max_records: u64,
    ) -> Result<ParsedPage, CatalogueError> {
        // CSW startPosition is 1-based; offsets everywhere else are 0-based.
        let body = get_records_request(offset + 1, max_records);
        debug!(endpoint, offset, max_records, "issuing GetRecords");

        let resp = self
            .http
            .post(endpoint)
            .header(CONTENT_TYPE, "application/xml")
            .body(body)
            .send()
            .await
            .map_err(|e| CatalogueError::Unreachable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(CatalogueError::HttpStatus(status.as_u16()));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| CatalogueError::Unreachable(e.to_string()))?;

        parse_get_records(&bytes)
    }
}

#[async_trait]
impl CatalogueClient for CswClient {
    async fn probe(&self, endpoint: &str) -> Result<ProbeResult, CatalogueError> {
        let page = self.get_records(endpoint, 0, self.page_size).await?;
        let effective = if page.returned > 0 {
            page.returned
        } else {
            self.page_size
        };
        Ok(ProbeResult {
            total_matches: page.matched,
            page_size: effective.max(1),
        })
    }

    async fn fetch_page(
        &self,
        endpoint: &str,
        offset: u64,
        page_size: u64,
    ) -> Result<Vec<CatalogRecord>, CatalogueError> {
        let page = self.get_records(endpoint, offset, page_size).await?;
        Ok(page.records)
    }
}

/// Build the GetRecords request body for one page.
fn get_records_request(start_position: u64, max_records: u64) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<csw:GetRecords xmlns:csw="http://www.opengis.net/cat/csw/2.0.2"
    service="CSW" version="2.0.2" resultType="results"
    startPosition="{start_position}" maxRecords="{max_records}"
    outputSchema="http://www.opengis.net/cat/csw/2.0.2">
  <csw:Query typeNames="csw:Record">
    <csw:ElementSetName>full</csw:ElementSetName>
  </csw:Query>
</csw:GetRecords>"#
    )
}

/// One parsed GetRecordsResponse page.
#[derive(Debug, Default)]
pub struct ParsedPage {
    pub matched: u64,
    pub returned: u64,
    pub records: Vec<CatalogRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Identifier,
    Title,
    Abstract,
    Publisher,
    Modified,
    Subject,
    Reference,
}

#[derive(Default)]
struct RecordBuilder {
    identifier: Option<String>,
    title: Option<String>,
    abstract_text: Option<String>,
    publisher: Option<String>,
    modified: Option<String>,
    subjects: Vec<String>,
    references: Vec<String>,
}

impl RecordBuilder {
    fn finish(self) -> CatalogRecord {
        CatalogRecord {
            identifier: self.identifier,
            // Titles and abstracts sometimes carry embedded newlines that
            // would corrupt downstream rows.
            title: self.title.map(|t| t.replace('\n', "")),
            abstract_text: self.abstract_text.map(|a| a.replace('\n', "")),
            publisher: self.publisher,
            modified: self.modified,
            subjects: self
                .subjects
                .into_iter()
                .filter(|s| !s.trim().is_empty())
                .collect(),
            references: self
                .references
                .into_iter()
                .map(|url| ServiceReference {
                    service_type: classify(&url),
                    url,
                })
                .collect(),
        }
    }
}

/// Parse a `csw:GetRecordsResponse` document.
///
/// Matches on local element names so the dc/dct/csw prefix spelling used
/// by a given server does not matter.
pub fn parse_get_records(xml: &[u8]) -> Result<ParsedPage, CatalogueError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut page = ParsedPage::default();
    let mut saw_search_results = false;
    let mut record: Option<RecordBuilder> = None;
    let mut field: Option<Field> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"ExceptionReport" => {
                    return Err(CatalogueError::Unparsable(
                        "service returned an exception report".to_string(),
                    ));
                }
                b"SearchResults" => {
                    saw_search_results = true;
                    page.matched = read_count_attr(&e, "numberOfRecordsMatched")?;
                    page.returned = read_count_attr(&e, "numberOfRecordsReturned")?;
                }
                b"Record" => {
                    record = Some(RecordBuilder::default());
                    field = None;
                }
                local if record.is_some() => {
                    field = match local {
                        b"identifier" => Some(Field::Identifier),
                        b"title" => Some(Field::Title),
                        b"abstract" => Some(Field::Abstract),
                        b"publisher" => Some(Field::Publisher),
                        b"modified" => Some(Field::Modified),
                        b"subject" => Some(Field::Subject),
                        b"references" => Some(Field::Reference),
                        _ => None,
                    };
                }
                _ => {}
            },
            Ok(Event::Text(t)) => {
                if let (Some(rec), Some(field)) = (record.as_mut(), field) {
                    let value = t
                        .unescape()
                        .map_err(|e| CatalogueError::Unparsable(e.to_string()))?
                        .trim()
                        .to_string();
                    if !value.is_empty() {
                        apply_field(rec, field, value);
                    }
                }
            }
            // Some servers wrap field text in CDATA.
            Ok(Event::CData(t)) => {
                if let (Some(rec), Some(field)) = (record.as_mut(), field) {
                    let raw = t.into_inner();
                    let value = String::from_utf8_lossy(&raw).trim().to_string();
                    if !value.is_empty() {
                        apply_field(rec, field, value);
                    }
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"Record" => {
                    if let Some(rec) = record.take() {
                        page.records.push(rec.finish());
                    }
                    field = None;
                }
                _ => {
                    field = None;
                }
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(CatalogueError::Unparsable(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    if !saw_search_results {
        return Err(CatalogueError::Unparsable(
            "no SearchResults element in response".to_string(),
        ));
    }

    Ok(page)
}

fn apply_field(rec: &mut RecordBuilder, field: Field, value: String) {
    match field {
        Field::Identifier => rec.identifier = Some(value),
        Field::Title => rec.title = Some(value),
        Field::Abstract => rec.abstract_text = Some(value),
        Field::Publisher => rec.publisher = Some(value),
        Field::Modified => rec.modified = Some(value),
        Field::Subject => rec.subjects.push(value),
        Field::Reference => rec.references.push(value),
    }
}

fn read_count_attr(
    e: &quick_xml::events::BytesStart<'_>,
    name: &str,
) -> Result<u64, CatalogueError> {
    let attr = e
        .try_get_attribute(name)
        .map_err(|e| CatalogueError::Unparsable(e.to_string()))?
        .ok_or_else(|| CatalogueError::Unparsable(format!("missing {} attribute", name)))?;
    let value = attr
        .unescape_value()
        .map_err(|e| CatalogueError::Unparsable(e.to_string()))?;
    value
        .parse::<u64>()
        .map_err(|_| CatalogueError::Unparsable(format!("bad {} attribute: {}", name, value)))
}
