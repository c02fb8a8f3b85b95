//! Classify OGC service URLs by family and operation.

use crate::models::ServiceType;

/// Classify a URL into a [`ServiceType`].
///
/// Inspection is case-insensitive substring matching: first the service
/// family token (`wms`, `wcs`, `wfs` — first family found wins in that
/// order), then the request-operation token, accepted either as a
/// `request=<op>` query parameter or as a bare token anywhere in the URL.
///
/// Pure and total: identical input always yields identical output, and
/// unrecognized input yields [`ServiceType::Unknown`].
pub fn classify(url: &str) -> ServiceType {
    let lower = url.to_lowercase();

    // When a URL carries both of a family's operation tokens, the more
    // specific data operation wins over capability discovery.
    if lower.contains("wms") {
        if has_operation(&lower, "getmap") {
            return ServiceType::WmsGetMap;
        }
        if has_operation(&lower, "getcapabilities") {
            return ServiceType::WmsCapabilities;
        }
    } else if lower.contains("wcs") {
        if has_operation(&lower, "getcoverage") {
            return ServiceType::WcsGetCoverage;
        }
        if has_operation(&lower, "describecoverage") {
            return ServiceType::WcsDescribeCoverage;
        }
    } else if lower.contains("wfs") {
        if has_operation(&lower, "getfeature") {
            return ServiceType::WfsGetFeature;
        }
        if has_operation(&lower, "getcapabilities") {
            return ServiceType::WfsCapabilities;
        }
    }

    ServiceType::Unknown
}

/// An operation token counts whether carried as a `request=` query
/// parameter or dropped bare into the path/query, so a plain substring
/// check covers both forms.
fn has_operation(lower_url: &str, op: &str) -> bool {
    lower_url.contains(op)
}
