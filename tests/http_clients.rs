//! HTTP client tests against mock CSW and WMS servers.

use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use wms_harvest::csw::{CatalogueClient, CswClient};
use wms_harvest::error::CatalogueError;
use wms_harvest::matcher::resolve;
use wms_harvest::models::{Bbox, ImageStatus, ServiceType};
use wms_harvest::validate::validate;
use wms_harvest::wms::{MapClient, RenderRequest, WmsClient};

const GET_RECORDS_RESPONSE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<csw:GetRecordsResponse xmlns:csw="http://www.opengis.net/cat/csw/2.0.2"
    xmlns:dc="http://purl.org/dc/elements/1.1/"
    xmlns:dct="http://purl.org/dc/terms/">
  <csw:SearchResults numberOfRecordsMatched="25" numberOfRecordsReturned="2" nextRecord="3">
    <csw:Record>
      <dc:identifier>rec-001</dc:identifier>
      <dc:title>Soil Types</dc:title>
      <dct:abstract>National soil classification.</dct:abstract>
      <dc:publisher>Survey Office</dc:publisher>
      <dct:modified>2023-06-01</dct:modified>
      <dc:subject>soil</dc:subject>
      <dct:references>https://maps.example/wms?SERVICE=WMS&amp;REQUEST=GetCapabilities</dct:references>
    </csw:Record>
    <csw:Record>
      <dc:identifier>rec-002</dc:identifier>
      <dc:title>Rivers</dc:title>
      <dct:references>https://maps.example/wfs?request=GetFeature</dct:references>
    </csw:Record>
  </csw:SearchResults>
</csw:GetRecordsResponse>"#;

const CAPABILITIES_RESPONSE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<WMS_Capabilities version="1.3.0" xmlns="http://www.opengis.net/wms">
  <Service>
    <Name>WMS</Name>
    <Title>Test Service</Title>
    <AccessConstraints>none</AccessConstraints>
  </Service>
  <Capability>
    <Layer>
      <Title>All Layers</Title>
      <Layer>
        <Name>ns:soil_types</Name>
        <Title>Soil Types</Title>
        <BoundingBox CRS="EPSG:27700" minx="0" miny="0" maxx="700000" maxy="1300000"/>
        <EX_GeographicBoundingBox>
          <westBoundLongitude>-8.2</westBoundLongitude>
          <eastBoundLongitude>1.8</eastBoundLongitude>
          <southBoundLatitude>49.8</southBoundLatitude>
          <northBoundLatitude>60.9</northBoundLatitude>
        </EX_GeographicBoundingBox>
      </Layer>
    </Layer>
  </Capability>
</WMS_Capabilities>"#;

fn csw_client() -> CswClient {
    CswClient::new(Duration::from_secs(5), 10).unwrap()
}

fn wms_client() -> WmsClient {
    WmsClient::new(Duration::from_secs(5), Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn probe_reads_match_count_and_effective_page_size() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/csw"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(GET_RECORDS_RESPONSE, "application/xml"))
        .mount(&server)
        .await;

    let endpoint = format!("{}/csw", server.uri());
    let probe = csw_client().probe(&endpoint).await.unwrap();
    assert_eq!(probe.total_matches, 25);
    // We asked for 10 but the server pages at 2.
    assert_eq!(probe.page_size, 2);
}

#[tokio::test]
async fn fetch_page_classifies_references() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/csw"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(GET_RECORDS_RESPONSE, "application/xml"))
        .mount(&server)
        .await;

    let endpoint = format!("{}/csw", server.uri());
    let records = csw_client().fetch_page(&endpoint, 0, 2).await.unwrap();
    assert_eq!(records.len(), 2);

    let first = &records[0];
    assert_eq!(first.title.as_deref(), Some("Soil Types"));
    assert_eq!(first.publisher.as_deref(), Some("Survey Office"));
    assert_eq!(
        first.references[0].service_type,
        ServiceType::WmsCapabilities
    );
    assert_eq!(
        records[1].references[0].service_type,
        ServiceType::WfsGetFeature
    );
}

#[tokio::test]
async fn csw_http_error_is_reported_as_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/csw"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let endpoint = format!("{}/csw", server.uri());
    let err = csw_client().probe(&endpoint).await.unwrap_err();
    assert!(matches!(err, CatalogueError::HttpStatus(500)));
}

#[tokio::test]
async fn non_csw_body_is_unparsable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/csw"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<html>login page</html>", "text/html"))
        .mount(&server)
        .await;

    let endpoint = format!("{}/csw", server.uri());
    let err = csw_client().probe(&endpoint).await.unwrap_err();
    assert!(matches!(err, CatalogueError::Unparsable(_)));
}

#[tokio::test]
async fn capabilities_fetch_parses_named_layers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wms"))
        .and(query_param("request", "GetCapabilities"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(CAPABILITIES_RESPONSE, "text/xml"))
        .mount(&server)
        .await;

    let url = format!("{}/wms?map=vendor.map", server.uri());
    let caps = wms_client().fetch_capabilities(&url).await.unwrap();
    assert_eq!(caps.access_constraints.as_deref(), Some("none"));
    assert_eq!(caps.layers.len(), 2);

    let named = &caps.layers[1];
    assert_eq!(named.name.as_deref(), Some("ns:soil_types"));
    assert_eq!(named.native.as_ref().unwrap().srs, "EPSG:27700");
}

#[tokio::test]
async fn failed_capabilities_fetch_degrades_to_flagged_null_match() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wms"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let url = format!("{}/wms", server.uri());
    let client = wms_client();
    let layer_match = resolve(&client, &url, "Soil Types").await;

    assert!(layer_match.capabilities_fetch_error);
    assert!(layer_match.name.is_none());
    assert!(layer_match.title.is_none());
    assert_eq!(layer_match.distance, -1);
    assert!(!layer_match.single_choice);
}

fn soil_render_request() -> RenderRequest {
    RenderRequest {
        layer: "ns:soil_types".to_string(),
        bbox: Bbox {
            min_x: 0.0,
            min_y: 0.0,
            max_x: 700000.0,
            max_y: 1300000.0,
        },
        srs: "EPSG:27700".to_string(),
        width: 400,
        height: 400,
        format: "image/png".to_string(),
    }
}

#[tokio::test]
async fn failed_getmap_sets_the_error_flag() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wms"))
        .and(query_param("request", "GetMap"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let tmp = TempDir::new().unwrap();
    let url = format!("{}/wms", server.uri());
    let client = wms_client();
    let result = validate(&client, &url, &soil_render_request(), tmp.path()).await;

    assert!(result.attempted);
    assert!(result.getmap_error);
    assert!(result.image_path.is_none());
}

#[tokio::test]
async fn empty_getmap_body_is_a_zero_size_image() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wms"))
        .and(query_param("request", "GetMap"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(Vec::<u8>::new()))
        .mount(&server)
        .await;

    let tmp = TempDir::new().unwrap();
    let url = format!("{}/wms", server.uri());
    let client = wms_client();
    let result = validate(&client, &url, &soil_render_request(), tmp.path()).await;

    assert!(result.attempted);
    assert!(!result.getmap_error);
    assert_eq!(result.status, Some(ImageStatus::ZeroSize));
}
