//! Deterministic cache-key fingerprints

use http::Method;
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::CacheConfig;
use crate::error::Result;
use crate::request::Request;
use crate::uri;

/// The canonical material hashed into a cache key. Field order is the
/// serialization order, so the fingerprint is stable across processes.
#[derive(Serialize)]
struct KeyMaterial<'a> {
    method: &'a str,
    uri: String,
    vary: Vec<(String, String)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    body_hash: Option<String>,
}

/// Computes the cache key for a resolved request
pub(crate) fn generate(
    request: &Request,
    config: &CacheConfig,
) -> Result<String> {
    generate_for_method(request, request.method(), config)
}

/// Computes the cache key a request would have under a different method.
/// Used to invalidate the GET entry after unsafe-method requests.
pub(crate) fn generate_for_method(
    request: &Request,
    method: &Method,
    config: &CacheConfig,
) -> Result<String> {
    let settings = request.cache_settings();
    if let Some(custom) = &settings.key {
        return Ok(format!("{}:{custom}", config.namespace));
    }
    if let Some(key_fn) = &config.cache_key_fn {
        return Ok(format!("{}:{}", config.namespace, key_fn(request)));
    }

    let url = request.absolute_url()?;
    let normalized = uri::normalize(url);

    let mut vary: Vec<(String, String)> = config
        .vary_headers
        .iter()
        .filter_map(|name| {
            let values: Vec<&str> = request
                .headers()
                .get_all(name.as_str())
                .iter()
                .filter_map(|value| value.to_str().ok())
                .collect();
            if values.is_empty() {
                None
            } else {
                Some((name.to_ascii_lowercase(), values.join(", ")))
            }
        })
        .collect();
    vary.sort();

    let body_hash = if *method != Method::GET
        && *method != Method::HEAD
        && settings.cache_body
    {
        Some(hex::encode(Sha256::digest(request.body().canonical_bytes()?)))
    } else {
        None
    };

    let material = KeyMaterial {
        method: method.as_str(),
        uri: normalized.to_string(),
        vary,
        body_hash,
    };
    let serialized = serde_json::to_vec(&material)?;
    Ok(format!("{}:{}", config.namespace, hex::encode(Sha256::digest(serialized))))
}
