//! Validate a resolved layer by requesting and inspecting a sample render.
//!
//! One GetMap request per layer, written to disk under a unique filename,
//! then classified by decoding the bytes and counting distinct colors. A
//! single uniform color is the (deliberately crude) signal that the layer
//! drew nothing but background at this extent.

use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{ImageStatus, ValidationResult};
use crate::wms::{MapClient, RenderRequest};

/// Issue one sample GetMap request and classify the returned image.
///
/// Callers check the preconditions (matched layer name, native bbox with
/// a non-empty SRS) and use [`ValidationResult::skipped`] when they do
/// not hold; this function assumes the request is well-formed. Every
/// branch returns a concrete result — nothing propagates past here.
pub async fn validate(
    client: &dyn MapClient,
    service_url: &str,
    request: &RenderRequest,
    out_dir: &Path,
) -> ValidationResult {
    let bytes = match client.render_image(service_url, request).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(url = service_url, layer = %request.layer, error = %e, "GetMap failed");
            return ValidationResult {
                attempted: true,
                getmap_error: true,
                image_path: None,
                status: None,
            };
        }
    };

    let filename = format!("{}_wms_map.png", Uuid::new_v4().simple());
    let path = out_dir.join(filename);
    if let Err(e) = std::fs::write(&path, &bytes) {
        warn!(path = %path.display(), error = %e, "failed to write map image");
    }

    let status = check_map_image(&path);
    info!(path = %path.display(), status = %status, "image checked");

    ValidationResult {
        attempted: true,
        getmap_error: false,
        image_path: Some(path),
        status: Some(status),
    }
}

/// Classify a map image written to disk.
pub fn check_map_image(path: &Path) -> ImageStatus {
    if !path.exists() {
        return ImageStatus::DoesNotExist;
    }

    match std::fs::metadata(path) {
        Ok(meta) if meta.len() == 0 => return ImageStatus::ZeroSize,
        Ok(_) => {}
        Err(_) => return ImageStatus::DoesNotExist,
    }

    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(_) => return ImageStatus::DoesNotExist,
    };

    // A body that is really a service exception document fails to decode.
    let decoded = match image::load_from_memory(&bytes) {
        Ok(img) => img,
        Err(_) => return ImageStatus::Invalid,
    };

    if distinct_colors(&decoded, 2) > 1 {
        ImageStatus::Populated
    } else {
        ImageStatus::BackgroundOnly
    }
}

/// Count distinct pixel colors, stopping once `limit` have been seen.
fn distinct_colors(img: &image::DynamicImage, limit: usize) -> usize {
    let rgba = img.to_rgba8();
    let mut seen: HashSet<[u8; 4]> = HashSet::new();
    for pixel in rgba.pixels() {
        seen.insert(pixel.0);
        if seen.len() >= limit {
            break;
        }
    }
    seen.len()
}
