//! Base/relative URI resolution and the normalization used for cache keying

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::Url;

use crate::error::{Error, Result};

// RFC 3986 unreserved characters stay literal; everything else is
// percent-encoded when query pairs are serialized.
const QUERY_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Resolves a request target against an optional base URL and merges query
/// parameters
///
/// An absolute `target` ignores `base` entirely. A relative target is joined
/// to the base with exactly one `/` between the base path and the target
/// (trailing slashes are stripped from the base, leading slashes from the
/// target). Query parameters are merged by key into any query already on the
/// URL, with the supplied pairs overriding existing keys.
pub fn resolve(
    base: Option<&Url>,
    target: &str,
    query: &[(String, String)],
) -> Result<Url> {
    let url = match Url::parse(target) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let base = base.ok_or_else(|| {
                Error::InvalidInput(format!(
                    "relative url {target:?} requires a base url"
                ))
            })?;
            let joined = format!(
                "{}/{}",
                base.as_str().trim_end_matches('/'),
                target.trim_start_matches('/')
            );
            Url::parse(&joined)?
        }
        Err(err) => return Err(err.into()),
    };
    merge_query(url, query)
}

/// Merges query parameters into a URL, supplied keys overriding existing ones
pub fn merge_query(mut url: Url, query: &[(String, String)]) -> Result<Url> {
    if query.is_empty() {
        return Ok(url);
    }
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .filter(|(k, _)| !query.iter().any(|(qk, _)| qk == k))
        .collect();
    pairs.extend(query.iter().cloned());
    set_query_pairs(&mut url, &pairs);
    Ok(url)
}

/// Normalizes a URL for cache keying
///
/// Lowercase scheme and host and default-port elision come from the `url`
/// parser itself; on top of that the fragment is stripped, an empty path
/// becomes `/`, and query pairs are decoded, sorted by key then value, and
/// re-encoded deterministically. The result is idempotent and invariant
/// under query-parameter reordering.
pub fn normalize(url: &Url) -> Url {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    if normalized.path().is_empty() {
        normalized.set_path("/");
    }
    let mut pairs: Vec<(String, String)> = normalized
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if pairs.is_empty() {
        if normalized.query().is_some() {
            normalized.set_query(None);
        }
        return normalized;
    }
    pairs.sort();
    set_query_pairs(&mut normalized, &pairs);
    normalized
}

fn set_query_pairs(url: &mut Url, pairs: &[(String, String)]) {
    if pairs.is_empty() {
        url.set_query(None);
        return;
    }
    let serialized = pairs
        .iter()
        .map(|(k, v)| {
            format!(
                "{}={}",
                utf8_percent_encode(k, QUERY_ENCODE),
                utf8_percent_encode(v, QUERY_ENCODE)
            )
        })
        .collect::<Vec<_>>()
        .join("&");
    url.set_query(Some(&serialized));
}
