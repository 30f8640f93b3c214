//! IIIF manifest and image service resolution.
//!
//! Two entry points mirror the two ways a map is addressed in the wild:
//! a Presentation API manifest (v2 or v3) that references an image service,
//! or the image service URL itself. Either way, resolution ends with the
//! service's capability document (`info.json`) and produces an immutable
//! [`ServiceInfo`] describing the full image dimensions and tiling
//! parameters.
//!
//! Manifest traversal is shape dispatch over untyped JSON: the v2 path
//! (`sequences -> canvases -> images -> resource -> service`) is tried
//! first, then the v3 path (`items -> items -> items -> body -> service`);
//! the first image service found wins.

pub mod url;

use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::error::Error;

/// Tile width assumed when a capability document declares no tiling.
pub const DEFAULT_TILE_SIZE: u32 = 1024;

/// Resolved image service parameters.
///
/// Immutable once resolved; consumed read-only by the downloader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    /// Image service base URL, without trailing slash.
    pub base_url: String,
    /// Full image width in pixels.
    pub width: u32,
    /// Full image height in pixels.
    pub height: u32,
    /// Server tile width in pixels.
    pub tile_size: u32,
    /// Integer downsampling ratios the server advertises as precomputed.
    pub scale_factors: Vec<u32>,
    /// Human-readable title, empty if the manifest carried none.
    pub label: String,
}

/// Resolve an image service by parsing a IIIF manifest.
///
/// Fetches the manifest, locates the first image service reference in it,
/// then fetches that service's `info.json` for tile configuration.
///
/// # Errors
/// Returns [`Error::Resolution`] if no image service is found in the
/// manifest, if either document is unreachable or malformed, or if the
/// service reports zero dimensions.
pub async fn resolve_manifest(client: &Client, manifest_url: &str) -> Result<ServiceInfo, Error> {
    let manifest = fetch_json(client, manifest_url).await?;
    let label = extract_label(&manifest);
    let (base_url, width, height) = find_image_service(&manifest)?;
    debug!(%base_url, width, height, "found image service in manifest");

    let info = fetch_json(client, &format!("{base_url}/info.json")).await?;
    let (tile_size, scale_factors) = parse_tiles(&info)?;

    validate_dimensions(width, height)?;
    Ok(ServiceInfo { base_url, width, height, tile_size, scale_factors, label })
}

/// Resolve an image service from its endpoint URL directly.
///
/// Fetches `{url}/info.json` and reads dimensions and tile configuration.
///
/// # Errors
/// Returns [`Error::Resolution`] if the capability document is unreachable
/// or malformed, or omits the image dimensions.
pub async fn resolve_service(client: &Client, service_url: &str) -> Result<ServiceInfo, Error> {
    let base_url = service_url.trim_end_matches('/').to_string();
    let info = fetch_json(client, &format!("{base_url}/info.json")).await?;

    let width = dimension(&info, "width")
        .ok_or_else(|| Error::Resolution(format!("{base_url}/info.json does not declare a width")))?;
    let height = dimension(&info, "height")
        .ok_or_else(|| Error::Resolution(format!("{base_url}/info.json does not declare a height")))?;
    let (tile_size, scale_factors) = parse_tiles(&info)?;
    let label = info.get("label").and_then(Value::as_str).unwrap_or("").to_string();

    validate_dimensions(width, height)?;
    Ok(ServiceInfo { base_url, width, height, tile_size, scale_factors, label })
}

/// Locate the first image service reference in a manifest document.
///
/// Returns the service base URL (trailing slash stripped) and the declared
/// width/height, falling back to the enclosing canvas's dimensions when the
/// resource omits them.
///
/// # Errors
/// Returns [`Error::Resolution`] if neither schema shape yields a service.
pub fn find_image_service(manifest: &Value) -> Result<(String, u32, u32), Error> {
    find_service_v2(manifest)
        .or_else(|| find_service_v3(manifest))
        .ok_or_else(|| Error::Resolution("no image service found in manifest".to_string()))
}

/// v2: sequences -> canvases -> images -> resource -> service
fn find_service_v2(manifest: &Value) -> Option<(String, u32, u32)> {
    for seq in items(manifest, "sequences") {
        for canvas in items(seq, "canvases") {
            for image in items(canvas, "images") {
                let Some(resource) = image.get("resource") else { continue };
                let service = match resource.get("service") {
                    Some(Value::Array(list)) => match list.first() {
                        Some(first) => first,
                        None => continue,
                    },
                    Some(svc) => svc,
                    None => continue,
                };
                if let Some(id) = service_id(service) {
                    let w = dimension(resource, "width")
                        .or_else(|| dimension(canvas, "width"))
                        .unwrap_or(0);
                    let h = dimension(resource, "height")
                        .or_else(|| dimension(canvas, "height"))
                        .unwrap_or(0);
                    return Some((id.trim_end_matches('/').to_string(), w, h));
                }
            }
        }
    }
    None
}

/// v3: items (canvases) -> items (pages) -> items (annotations) -> body -> service
fn find_service_v3(manifest: &Value) -> Option<(String, u32, u32)> {
    for canvas in items(manifest, "items") {
        for page in items(canvas, "items") {
            for anno in items(page, "items") {
                let Some(body) = anno.get("body") else { continue };
                let services: Vec<&Value> = match body.get("service") {
                    Some(Value::Array(list)) => list.iter().collect(),
                    Some(svc) => vec![svc],
                    None => continue,
                };
                for svc in services {
                    if let Some(id) = service_id(svc) {
                        let w = dimension(body, "width")
                            .or_else(|| dimension(canvas, "width"))
                            .unwrap_or(0);
                        let h = dimension(body, "height")
                            .or_else(|| dimension(canvas, "height"))
                            .unwrap_or(0);
                        return Some((id.trim_end_matches('/').to_string(), w, h));
                    }
                }
            }
        }
    }
    None
}

/// Extract a manifest label.
///
/// A plain string is used verbatim; a language-tagged mapping
/// (`{"en": ["..."]}`, the v3 shape) yields the first entry's first value.
/// A missing or empty label never fails; callers default it downstream.
#[must_use]
pub fn extract_label(manifest: &Value) -> String {
    match manifest.get("label") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Object(map)) => map
            .values()
            .next()
            .and_then(Value::as_array)
            .and_then(|vals| vals.first())
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
        _ => String::new(),
    }
}

/// Read tile configuration from a capability document.
///
/// Defaults to `tile_size = 1024, scale_factors = [1]` when the document
/// declares no tiling. A declared tile width of zero is rejected here,
/// before any tile request could be issued.
fn parse_tiles(info: &Value) -> Result<(u32, Vec<u32>), Error> {
    let mut tile_size = DEFAULT_TILE_SIZE;
    let mut scale_factors = vec![1];

    if let Some(tile) = info.get("tiles").and_then(Value::as_array).and_then(|t| t.first()) {
        if let Some(w) = tile.get("width").and_then(Value::as_u64) {
            tile_size = u32::try_from(w).unwrap_or(DEFAULT_TILE_SIZE);
        }
        if let Some(factors) = tile.get("scaleFactors").and_then(Value::as_array) {
            let parsed: Vec<u32> = factors
                .iter()
                .filter_map(Value::as_u64)
                .filter_map(|v| u32::try_from(v).ok())
                .collect();
            if !parsed.is_empty() {
                scale_factors = parsed;
            }
        }
    }

    if tile_size == 0 {
        return Err(Error::Resolution(
            "capability document declares a zero tile width".to_string(),
        ));
    }
    Ok((tile_size, scale_factors))
}

fn validate_dimensions(width: u32, height: u32) -> Result<(), Error> {
    if width == 0 || height == 0 {
        return Err(Error::Resolution(format!(
            "image service reports degenerate dimensions {width}x{height}"
        )));
    }
    Ok(())
}

/// Iterate the array behind `key`, or nothing if absent or not an array.
fn items<'a>(value: &'a Value, key: &str) -> impl Iterator<Item = &'a Value> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|list| list.iter())
        .into_iter()
        .flatten()
}

/// A service's identifier: `@id` (v2) or `id` (v3), non-empty.
fn service_id(service: &Value) -> Option<&str> {
    service
        .get("@id")
        .or_else(|| service.get("id"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Numeric dimension that may be encoded as a JSON number or string.
fn dimension(value: &Value, key: &str) -> Option<u32> {
    match value.get(key)? {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

async fn fetch_json(client: &Client, url: &str) -> Result<Value, Error> {
    let response = client
        .get(url)
        .header("Accept", "application/json")
        .send()
        .await
        .map_err(|e| Error::Resolution(format!("failed to fetch {url}: {e}")))?
        .error_for_status()
        .map_err(|e| Error::Resolution(format!("failed to fetch {url}: {e}")))?;

    response
        .json()
        .await
        .map_err(|e| Error::Resolution(format!("malformed JSON from {url}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn v2_manifest() -> Value {
        json!({
            "label": "Atlas of the United States",
            "sequences": [{
                "canvases": [{
                    "width": 6000,
                    "height": 4000,
                    "images": [{
                        "resource": {
                            "width": 5000,
                            "height": 3500,
                            "service": { "@id": "https://ids.example.org/iiif/map1/" }
                        }
                    }]
                }]
            }]
        })
    }

    fn v3_manifest() -> Value {
        json!({
            "label": { "en": ["The Histomap"] },
            "items": [{
                "width": 7000,
                "height": 9000,
                "items": [{
                    "items": [{
                        "body": {
                            "width": 7000,
                            "height": 9000,
                            "service": [{ "id": "https://ids.example.org/iiif/map2" }]
                        }
                    }]
                }]
            }]
        })
    }

    #[test]
    fn test_find_service_v2() {
        let (url, w, h) = find_image_service(&v2_manifest()).unwrap();
        assert_eq!(url, "https://ids.example.org/iiif/map1");
        assert_eq!((w, h), (5000, 3500));
    }

    #[test]
    fn test_find_service_v2_canvas_dimension_fallback() {
        let mut manifest = v2_manifest();
        let resource =
            &mut manifest["sequences"][0]["canvases"][0]["images"][0]["resource"];
        resource.as_object_mut().unwrap().remove("width");
        resource.as_object_mut().unwrap().remove("height");

        let (_, w, h) = find_image_service(&manifest).unwrap();
        assert_eq!((w, h), (6000, 4000));
    }

    #[test]
    fn test_find_service_v2_service_list() {
        let mut manifest = v2_manifest();
        manifest["sequences"][0]["canvases"][0]["images"][0]["resource"]["service"] =
            json!([{ "@id": "https://ids.example.org/iiif/listed" }]);
        let (url, _, _) = find_image_service(&manifest).unwrap();
        assert_eq!(url, "https://ids.example.org/iiif/listed");
    }

    #[test]
    fn test_find_service_v3() {
        let (url, w, h) = find_image_service(&v3_manifest()).unwrap();
        assert_eq!(url, "https://ids.example.org/iiif/map2");
        assert_eq!((w, h), (7000, 9000));
    }

    #[test]
    fn test_find_service_v3_single_service_object() {
        let mut manifest = v3_manifest();
        manifest["items"][0]["items"][0]["items"][0]["body"]["service"] =
            json!({ "id": "https://ids.example.org/iiif/single" });
        let (url, _, _) = find_image_service(&manifest).unwrap();
        assert_eq!(url, "https://ids.example.org/iiif/single");
    }

    #[test]
    fn test_no_service_found() {
        let manifest = json!({ "label": "empty", "sequences": [] });
        let err = find_image_service(&manifest).unwrap_err();
        assert!(matches!(err, Error::Resolution(_)));
    }

    #[test]
    fn test_extract_label_plain_string() {
        assert_eq!(extract_label(&v2_manifest()), "Atlas of the United States");
    }

    #[test]
    fn test_extract_label_language_map() {
        assert_eq!(extract_label(&v3_manifest()), "The Histomap");
    }

    #[test]
    fn test_extract_label_absent_is_empty() {
        assert_eq!(extract_label(&json!({})), "");
        assert_eq!(extract_label(&json!({ "label": { "en": [] } })), "");
    }

    #[test]
    fn test_parse_tiles_declared() {
        let info = json!({
            "width": 5000,
            "height": 3500,
            "tiles": [{ "width": 512, "scaleFactors": [1, 2, 4, 8] }]
        });
        let (tile_size, factors) = parse_tiles(&info).unwrap();
        assert_eq!(tile_size, 512);
        assert_eq!(factors, vec![1, 2, 4, 8]);
    }

    #[test]
    fn test_parse_tiles_defaults() {
        let (tile_size, factors) = parse_tiles(&json!({ "width": 100 })).unwrap();
        assert_eq!(tile_size, DEFAULT_TILE_SIZE);
        assert_eq!(factors, vec![1]);
    }

    #[test]
    fn test_parse_tiles_zero_width_rejected() {
        let info = json!({ "tiles": [{ "width": 0 }] });
        assert!(matches!(parse_tiles(&info), Err(Error::Resolution(_))));
    }

    #[test]
    fn test_validate_dimensions() {
        assert!(validate_dimensions(100, 100).is_ok());
        assert!(validate_dimensions(0, 100).is_err());
        assert!(validate_dimensions(100, 0).is_err());
    }
}
