//! WMS map-service client: capability discovery and sample renders.
//!
//! [`WmsClient`] fetches `GetCapabilities` documents, flattens the nested
//! layer tree into document order (children inherit bounding boxes from
//! their parents when they declare none of their own), and issues `GetMap`
//! requests for resolved layers. The [`MapClient`] trait is the seam the
//! resolver and validator work against.

use anyhow::Result;
use async_trait::async_trait;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::MapServiceError;
use crate::models::{Bbox, Layer, NativeBbox, ServiceCapabilities};

/// Parameters of one sample GetMap request.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub layer: String,
    pub bbox: Bbox,
    pub srs: String,
    pub width: u32,
    pub height: u32,
    pub format: String,
}

/// A map service exposing capability discovery and rendered-image requests.
#[async_trait]
pub trait MapClient: Send + Sync {
    async fn fetch_capabilities(&self, url: &str)
        -> Result<ServiceCapabilities, MapServiceError>;

    async fn render_image(
        &self,
        url: &str,
        request: &RenderRequest,
    ) -> Result<Vec<u8>, MapServiceError>;
}

/// HTTP implementation of [`MapClient`] over WMS 1.3.0.
pub struct WmsClient {
    http: reqwest::Client,
    capabilities_timeout: Duration,
    getmap_timeout: Duration,
}

impl WmsClient {
    pub fn new(capabilities_timeout: Duration, getmap_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().build()?;
        Ok(WmsClient {
            http,
            capabilities_timeout,
            getmap_timeout,
        })
    }

    async fn get_bytes(&self, url: Url, timeout: Duration) -> Result<Vec<u8>, MapServiceError> {
        let resp = self
            .http
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| MapServiceError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(MapServiceError::HttpStatus(status.as_u16()));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| MapServiceError::Transport(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl MapClient for WmsClient {
    async fn fetch_capabilities(
        &self,
        url: &str,
    ) -> Result<ServiceCapabilities, MapServiceError> {
        let request_url = capabilities_url(url)?;
        debug!(url = %request_url, "fetching capabilities");
        let bytes = self.get_bytes(request_url, self.capabilities_timeout).await?;
        parse_capabilities(&bytes)
    }

    async fn render_image(
        &self,
        url: &str,
        request: &RenderRequest,
    ) -> Result<Vec<u8>, MapServiceError> {
        let request_url = getmap_url(url, request)?;
        debug!(url = %request_url, layer = %request.layer, "issuing GetMap");
        self.get_bytes(request_url, self.getmap_timeout).await
    }
}

// ============ Request URL construction ============

/// Query parameter keys that belong to the WMS protocol itself. Existing
/// occurrences are stripped before the request's own values are appended;
/// vendor parameters (e.g. MapServer's `map=`) pass through untouched.
const WMS_KEYS: &[&str] = &[
    "service", "version", "request", "layers", "styles", "crs", "srs", "bbox", "width", "height",
    "format", "transparent",
];

fn merge_query(base: &str, params: &[(&str, String)]) -> Result<Url, MapServiceError> {
    let mut url = Url::parse(base).map_err(|e| MapServiceError::BadUrl(e.to_string()))?;

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !WMS_KEYS.iter().any(|wk| wk.eq_ignore_ascii_case(k)))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        for (k, v) in &kept {
            pairs.append_pair(k, v);
        }
        for (k, v) in params {
            pairs.append_pair(k, v);
        }
    }

    Ok(url)
}

fn capabilities_url(base: &str) -> Result<Url, MapServiceError> {
    merge_query(
        base,
        &[
            ("service", "WMS".to_string()),
            ("request", "GetCapabilities".to_string()),
            ("version", "1.3.0".to_string()),
        ],
    )
}

fn getmap_url(base: &str, req: &RenderRequest) -> Result<Url, MapServiceError> {
    let bbox = format!(
        "{},{},{},{}",
        req.bbox.min_x, req.bbox.min_y, req.bbox.max_x, req.bbox.max_y
    );
    merge_query(
        base,
        &[
            ("service", "WMS".to_string()),
            ("version", "1.3.0".to_string()),
            ("request", "GetMap".to_string()),
            ("layers", req.layer.clone()),
            ("styles", String::new()),
            ("crs", req.srs.clone()),
            ("bbox", bbox),
            ("width", req.width.to_string()),
            ("height", req.height.to_string()),
            ("format", req.format.clone()),
        ],
    )
}

// ============ Capabilities parsing ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    LayerName,
    LayerTitle,
    AccessConstraints,
    GeoWest,
    GeoEast,
    GeoSouth,
    GeoNorth,
}

#[derive(Default, Clone)]
struct PendingLayer {
    order: usize,
    name: Option<String>,
    title: Option<String>,
    native: Option<NativeBbox>,
    own_native: bool,
    wgs84: Option<Bbox>,
    own_wgs84: bool,
    geo: [Option<f64>; 4],
}

/// Parse a WMS capabilities document (1.3.0 or 1.1.1 vocabulary).
///
/// Layers come out flattened in document order. A child layer that
/// declares no bounding box of its own inherits its parent's; the first
/// `<BoundingBox>` a layer declares is taken as its native box.
pub fn parse_capabilities(xml: &[u8]) -> Result<ServiceCapabilities, MapServiceError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut path: Vec<String> = Vec::new();
    let mut stack: Vec<PendingLayer> = Vec::new();
    let mut finished: Vec<(usize, Layer)> = Vec::new();
    let mut access_constraints: Option<String> = None;
    let mut field: Option<Field> = None;
    let mut order = 0usize;
    let mut saw_root = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let local = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                match local.as_str() {
                    "WMS_Capabilities" | "WMT_MS_Capabilities" => saw_root = true,
                    "Layer" => {
                        let mut pending = PendingLayer {
                            order,
                            ..Default::default()
                        };
                        order += 1;
                        if let Some(parent) = stack.last() {
                            pending.native = parent.native.clone();
                            pending.wgs84 = parent.wgs84;
                        }
                        stack.push(pending);
                    }
                    "Name" if path.last().map(String::as_str) == Some("Layer") => {
                        field = Some(Field::LayerName);
                    }
                    "Title" if path.last().map(String::as_str) == Some("Layer") => {
                        field = Some(Field::LayerTitle);
                    }
                    "AccessConstraints" if path.last().map(String::as_str) == Some("Service") => {
                        field = Some(Field::AccessConstraints);
                    }
                    "westBoundLongitude" => field = Some(Field::GeoWest),
                    "eastBoundLongitude" => field = Some(Field::GeoEast),
                    "southBoundLatitude" => field = Some(Field::GeoSouth),
                    "northBoundLatitude" => field = Some(Field::GeoNorth),
                    "BoundingBox" => apply_bounding_box(&e, stack.last_mut()),
                    "LatLonBoundingBox" => apply_latlon_box(&e, stack.last_mut()),
                    _ => {}
                }
                path.push(local);
            }
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"BoundingBox" => apply_bounding_box(&e, stack.last_mut()),
                b"LatLonBoundingBox" => apply_latlon_box(&e, stack.last_mut()),
                _ => {}
            },
            Ok(Event::Text(t)) => {
                if let Some(current) = field {
                    let value = t
                        .unescape()
                        .map_err(|e| MapServiceError::Unparsable(e.to_string()))?
                        .trim()
                        .to_string();
                    if !value.is_empty() {
                        apply_field(current, value, &mut access_constraints, &mut stack);
                    }
                }
            }
            // Some servers wrap names and titles in CDATA.
            Ok(Event::CData(t)) => {
                if let Some(current) = field {
                    let raw = t.into_inner();
                    let value = String::from_utf8_lossy(&raw).trim().to_string();
                    if !value.is_empty() {
                        apply_field(current, value, &mut access_constraints, &mut stack);
                    }
                }
            }
            Ok(Event::End(e)) => {
                path.pop();
                field = None;
                match e.local_name().as_ref() {
                    b"Layer" => {
                        if let Some(done) = stack.pop() {
                            if let Some(title) = done.title.clone() {
                                finished.push((
                                    done.order,
                                    Layer {
                                        name: done.name,
                                        title,
                                        native: done.native,
                                        wgs84: done.wgs84,
                                    },
                                ));
                            }
                        }
                    }
                    b"EX_GeographicBoundingBox" => {
                        if let Some(layer) = stack.last_mut() {
                            if !layer.own_wgs84 {
                                if let [Some(w), Some(s), Some(e), Some(n)] = layer.geo {
                                    layer.wgs84 = Some(Bbox {
                                        min_x: w,
                                        min_y: s,
                                        max_x: e,
                                        max_y: n,
                                    });
                                    layer.own_wgs84 = true;
                                }
                            }
                            layer.geo = [None; 4];
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(MapServiceError::Unparsable(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    if !saw_root {
        return Err(MapServiceError::Unparsable(
            "no WMS capabilities root element in response".to_string(),
        ));
    }

    finished.sort_by_key(|(order, _)| *order);
    Ok(ServiceCapabilities {
        access_constraints,
        layers: finished.into_iter().map(|(_, layer)| layer).collect(),
    })
}

fn apply_field(
    field: Field,
    value: String,
    access_constraints: &mut Option<String>,
    stack: &mut Vec<PendingLayer>,
) {
    match field {
        Field::AccessConstraints => *access_constraints = Some(value),
        Field::LayerName => {
            if let Some(layer) = stack.last_mut() {
                layer.name = Some(value);
            }
        }
        Field::LayerTitle => {
            if let Some(layer) = stack.last_mut() {
                layer.title = Some(value);
            }
        }
        Field::GeoWest | Field::GeoEast | Field::GeoSouth | Field::GeoNorth => {
            if let (Some(layer), Ok(v)) = (stack.last_mut(), value.parse::<f64>()) {
                let idx = match field {
                    Field::GeoWest => 0,
                    Field::GeoSouth => 1,
                    Field::GeoEast => 2,
                    Field::GeoNorth => 3,
                    _ => unreachable!(),
                };
                layer.geo[idx] = Some(v);
            }
        }
    }
}

fn attr_value(e: &BytesStart<'_>, name: &str) -> Option<String> {
    e.try_get_attribute(name)
        .ok()
        .flatten()
        .and_then(|a| a.unescape_value().ok())
        .map(|v| v.into_owned())
}

fn attr_f64(e: &BytesStart<'_>, name: &str) -> Option<f64> {
    attr_value(e, name).and_then(|v| v.parse::<f64>().ok())
}

/// `<BoundingBox>` with CRS (1.3.0) or SRS (1.1.1) attribute. The first
/// box a layer declares wins; later ones are alternative projections.
fn apply_bounding_box(e: &BytesStart<'_>, layer: Option<&mut PendingLayer>) {
    let Some(layer) = layer else { return };
    if layer.own_native {
        return;
    }
    let srs = attr_value(e, "CRS")
        .or_else(|| attr_value(e, "SRS"))
        .unwrap_or_default();
    if let (Some(min_x), Some(min_y), Some(max_x), Some(max_y)) = (
        attr_f64(e, "minx"),
        attr_f64(e, "miny"),
        attr_f64(e, "maxx"),
        attr_f64(e, "maxy"),
    ) {
        layer.native = Some(NativeBbox {
            bbox: Bbox {
                min_x,
                min_y,
                max_x,
                max_y,
            },
            srs,
        });
        layer.own_native = true;
    }
}

/// WMS 1.1.1 `<LatLonBoundingBox>`: WGS84 box carried as attributes.
fn apply_latlon_box(e: &BytesStart<'_>, layer: Option<&mut PendingLayer>) {
    let Some(layer) = layer else { return };
    if layer.own_wgs84 {
        return;
    }
    if let (Some(min_x), Some(min_y), Some(max_x), Some(max_y)) = (
        attr_f64(e, "minx"),
        attr_f64(e, "miny"),
        attr_f64(e, "maxx"),
        attr_f64(e, "maxy"),
    ) {
        layer.wgs84 = Some(Bbox {
            min_x,
            min_y,
            max_x,
            max_y,
        });
        layer.own_wgs84 = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAPS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<WMS_Capabilities version="1.3.0" xmlns="http://www.opengis.net/wms">
  <Service>
    <Name>WMS</Name>
    <Title>Test Map Server</Title>
    <AccessConstraints>Open Government Licence</AccessConstraints>
  </Service>
  <Capability>
    <Layer>
      <Title>All Layers</Title>
      <EX_GeographicBoundingBox>
        <westBoundLongitude>-8.65</westBoundLongitude>
        <eastBoundLongitude>1.77</eastBoundLongitude>
        <southBoundLatitude>49.86</southBoundLatitude>
        <northBoundLatitude>60.86</northBoundLatitude>
      </EX_GeographicBoundingBox>
      <BoundingBox CRS="EPSG:27700" minx="0" miny="0" maxx="700000" maxy="1300000"/>
      <Layer>
        <Name>woodland</Name>
        <Title>Ancient Woodland Inventory</Title>
        <Style><Name>default</Name><Title>Default style</Title></Style>
      </Layer>
      <Layer>
        <Name>flood_zones</Name>
        <Title>Flood Zones</Title>
        <BoundingBox CRS="EPSG:4326" minx="49.8" miny="-8.7" maxx="60.9" maxy="1.8"/>
        <BoundingBox CRS="EPSG:3857" minx="-968397" maxx="200376" miny="6400000" maxy="8500000"/>
      </Layer>
    </Layer>
  </Capability>
</WMS_Capabilities>"#;

    #[test]
    fn parses_layers_in_document_order() {
        let caps = parse_capabilities(CAPS.as_bytes()).unwrap();
        let titles: Vec<&str> = caps.layers.iter().map(|l| l.title.as_str()).collect();
        assert_eq!(
            titles,
            vec!["All Layers", "Ancient Woodland Inventory", "Flood Zones"]
        );
    }

    #[test]
    fn category_layer_has_no_name() {
        let caps = parse_capabilities(CAPS.as_bytes()).unwrap();
        assert!(caps.layers[0].name.is_none());
        assert_eq!(caps.layers[1].name.as_deref(), Some("woodland"));
    }

    #[test]
    fn style_name_does_not_clobber_layer_name() {
        let caps = parse_capabilities(CAPS.as_bytes()).unwrap();
        assert_eq!(caps.layers[1].name.as_deref(), Some("woodland"));
        assert_eq!(caps.layers[1].title, "Ancient Woodland Inventory");
    }

    #[test]
    fn child_inherits_parent_bounding_boxes() {
        let caps = parse_capabilities(CAPS.as_bytes()).unwrap();
        let woodland = &caps.layers[1];
        let native = woodland.native.as_ref().unwrap();
        assert_eq!(native.srs, "EPSG:27700");
        assert_eq!(native.bbox.max_x, 700000.0);
        let wgs84 = woodland.wgs84.unwrap();
        assert_eq!(wgs84.min_x, -8.65);
    }

    #[test]
    fn own_bounding_box_overrides_inherited_and_first_wins() {
        let caps = parse_capabilities(CAPS.as_bytes()).unwrap();
        let flood = &caps.layers[2];
        let native = flood.native.as_ref().unwrap();
        assert_eq!(native.srs, "EPSG:4326");
    }

    #[test]
    fn captures_service_access_constraints() {
        let caps = parse_capabilities(CAPS.as_bytes()).unwrap();
        assert_eq!(
            caps.access_constraints.as_deref(),
            Some("Open Government Licence")
        );
    }

    #[test]
    fn cdata_wrapped_name_and_title_parse() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<WMS_Capabilities version="1.3.0" xmlns="http://www.opengis.net/wms">
  <Service>
    <Name>WMS</Name>
    <Title>Test</Title>
  </Service>
  <Capability>
    <Layer>
      <Name><![CDATA[rivers]]></Name>
      <Title><![CDATA[Rivers & Streams]]></Title>
      <BoundingBox CRS="EPSG:27700" minx="0" miny="0" maxx="700000" maxy="1300000"/>
    </Layer>
  </Capability>
</WMS_Capabilities>"#;
        let caps = parse_capabilities(xml.as_bytes()).unwrap();
        assert_eq!(caps.layers.len(), 1);
        assert_eq!(caps.layers[0].name.as_deref(), Some("rivers"));
        assert_eq!(caps.layers[0].title, "Rivers & Streams");
    }

    #[test]
    fn non_capabilities_document_is_unparsable() {
        let err = parse_capabilities(b"<html><body>login page</body></html>").unwrap_err();
        assert!(matches!(err, MapServiceError::Unparsable(_)));
    }

    #[test]
    fn capabilities_url_merges_existing_query() {
        let url = capabilities_url(
            "https://example.com/wms?map=/maps/uk.map&REQUEST=GetCapabilities&service=wms",
        )
        .unwrap();
        let query = url.query().unwrap();
        // Vendor parameter survives; protocol parameters are replaced once.
        assert!(query.contains("map=%2Fmaps%2Fuk.map"));
        assert_eq!(query.matches("request=GetCapabilities").count(), 1);
        assert!(!query.contains("REQUEST="));
        assert!(query.contains("version=1.3.0"));
    }

    #[test]
    fn getmap_url_carries_render_parameters() {
        let req = RenderRequest {
            layer: "woodland".to_string(),
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
        };
        let url = getmap_url("https://example.com/wms", &req).unwrap();
        let query = url.query().unwrap();
        assert!(query.contains("request=GetMap"));
        assert!(query.contains("layers=woodland"));
        assert!(query.contains("crs=EPSG%3A27700"));
        assert!(query.contains("bbox=0%2C0%2C700000%2C1300000"));
        assert!(query.contains("width=400"));
        assert!(query.contains("format=image%2Fpng"));
    }
}
