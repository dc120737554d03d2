use std::collections::HashMap;
use std::str::FromStr;

use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A serializable multi-value header map
///
/// [`http::HeaderMap`] carries request and response headers in flight, but it
/// has no serde support; cached entries and recordings persist their headers
/// through this type instead. Keys are normalized to lowercase per RFC 7230,
/// and the wire shape is a plain `{"name": ["value", ...]}` map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HeaderBag {
    inner: HashMap<String, Vec<String>>,
}

impl HeaderBag {
    /// Creates an empty bag
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a header, replacing any existing values for that name
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.inner.insert(name.to_ascii_lowercase(), vec![value.into()]);
    }

    /// Appends a value, preserving existing values for the same name
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        self.inner
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    /// Retrieves the first value for a header name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner
            .get(&name.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Retrieves every value for a header name
    pub fn get_all(&self, name: &str) -> &[String] {
        self.inner
            .get(&name.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Removes a header name and all its values
    pub fn remove(&mut self, name: &str) {
        self.inner.remove(&name.to_ascii_lowercase());
    }

    /// Checks whether a header name is present
    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(&name.to_ascii_lowercase())
    }

    /// Returns an iterator over `(name, value)` pairs, one per value
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().flat_map(|(name, values)| {
            values.iter().map(move |value| (name.as_str(), value.as_str()))
        })
    }

    /// Number of distinct header names
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// True when no headers are present
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Rebuilds an [`http::HeaderMap`], skipping values that are not valid
    /// header material
    pub fn to_header_map(&self) -> Result<HeaderMap> {
        let mut map = HeaderMap::new();
        for (name, value) in self.iter() {
            map.append(
                HeaderName::from_str(name)?,
                HeaderValue::from_str(value)?,
            );
        }
        Ok(map)
    }
}

impl From<&HeaderMap> for HeaderBag {
    fn from(headers: &HeaderMap) -> Self {
        let mut bag = HeaderBag::new();
        for (name, value) in headers {
            if let Ok(value) = value.to_str() {
                bag.append(name.as_str(), value);
            }
        }
        bag
    }
}

impl From<HeaderBag> for HashMap<String, Vec<String>> {
    fn from(bag: HeaderBag) -> Self {
        bag.inner
    }
}

impl From<HashMap<String, Vec<String>>> for HeaderBag {
    fn from(map: HashMap<String, Vec<String>>) -> Self {
        let mut bag = HeaderBag::new();
        for (name, values) in map {
            for value in values {
                bag.append(&name, value);
            }
        }
        bag
    }
}

impl FromIterator<(String, String)> for HeaderBag {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut bag = HeaderBag::new();
        for (name, value) in iter {
            bag.append(&name, value);
        }
        bag
    }
}
