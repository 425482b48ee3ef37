//! Session capabilities advertised by the peer in its `<hello>`
//!
//! The set is built once when the session is adopted and never changes.

use std::collections::{BTreeSet, HashMap};

use crate::encoding::EncodingFormat;

/// NETCONF 1.0 base protocol
pub const BASE_1_0: &str = "urn:ietf:params:netconf:base:1.0";
/// NETCONF 1.1 base protocol (adds the `remove` edit operation)
pub const BASE_1_1: &str = "urn:ietf:params:netconf:base:1.1";
pub const CANDIDATE: &str = "urn:ietf:params:netconf:capability:candidate:1.0";
pub const STARTUP: &str = "urn:ietf:params:netconf:capability:startup:1.0";
pub const WRITABLE_RUNNING: &str = "urn:ietf:params:netconf:capability:writable-running:1.0";
pub const VALIDATE: &str = "urn:ietf:params:netconf:capability:validate:1.1";
/// Encoding advertisement, e.g. `...:encoding:1.0?formats=xml,json&default=json`
pub const ENCODING: &str = "urn:ietf:params:netconf:capability:encoding:1.0";

/// A YANG module announced through a `?module=` capability
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisedModule {
    pub name: String,
    pub revision: Option<String>,
    pub namespace: String,
}

/// Frozen set of capability URIs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    uris: BTreeSet<String>,
}

impl Capabilities {
    pub fn new<I, S>(uris: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            uris: uris
                .into_iter()
                .map(|s| s.into().trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    /// Check for a capability, ignoring any query parameters it carries
    pub fn contains(&self, uri: &str) -> bool {
        self.uris.iter().any(|c| split_query(c).0 == uri)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.uris.iter().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.uris.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uris.is_empty()
    }

    /// Whether the peer speaks any NETCONF base version
    pub fn has_base(&self) -> bool {
        self.contains(BASE_1_0) || self.contains(BASE_1_1)
    }

    /// Query parameters of the first capability matching `uri`
    pub fn params(&self, uri: &str) -> Option<HashMap<&str, &str>> {
        self.uris.iter().find_map(|c| {
            let (base, query) = split_query(c);
            (base == uri).then(|| parse_query(query.unwrap_or("")))
        })
    }

    /// Encodings the peer accepts; XML is always included
    pub fn supported_encodings(&self) -> Vec<EncodingFormat> {
        let mut formats = vec![EncodingFormat::Xml];
        if let Some(params) = self.params(ENCODING)
            && let Some(list) = params.get("formats")
        {
            for name in list.split(',') {
                if let Ok(format) = name.trim().parse::<EncodingFormat>()
                    && !formats.contains(&format)
                {
                    formats.push(format);
                }
            }
        }
        formats
    }

    pub fn supports_encoding(&self, format: EncodingFormat) -> bool {
        self.supported_encodings().contains(&format)
    }

    /// Encoding the peer declares as its default, if any
    pub fn default_encoding(&self) -> Option<EncodingFormat> {
        self.params(ENCODING)?
            .get("default")
            .and_then(|name| name.parse().ok())
    }

    /// Modules announced with `?module=<name>[&revision=<date>]`
    pub fn advertised_modules(&self) -> Vec<AdvertisedModule> {
        self.uris
            .iter()
            .filter_map(|c| {
                let (base, query) = split_query(c);
                let params = parse_query(query?);
                let name = params.get("module")?;
                Some(AdvertisedModule {
                    name: name.to_string(),
                    revision: params.get("revision").map(|r| r.to_string()),
                    namespace: base.to_string(),
                })
            })
            .collect()
    }
}

fn split_query(uri: &str) -> (&str, Option<&str>) {
    match uri.split_once('?') {
        Some((base, query)) => (base, Some(query)),
        None => (uri, None),
    }
}

fn parse_query(query: &str) -> HashMap<&str, &str> {
    query
        .split('&')
        .filter_map(|part| part.split_once('='))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> Capabilities {
        Capabilities::new([
            BASE_1_0,
            CANDIDATE,
            "urn:ietf:params:netconf:capability:encoding:1.0?formats=xml,json&default=json",
            "urn:example:interfaces?module=example-if&revision=2024-01-01",
            "edit-config:replace",
        ])
    }

    #[test]
    fn test_contains_ignores_query() {
        let caps = caps();
        assert!(caps.contains(CANDIDATE));
        assert!(caps.contains(ENCODING));
        assert!(caps.contains("edit-config:replace"));
        assert!(!caps.contains(BASE_1_1));
        assert!(caps.has_base());
    }

    #[test]
    fn test_encodings() {
        let caps = caps();
        assert_eq!(
            caps.supported_encodings(),
            vec![EncodingFormat::Xml, EncodingFormat::Json]
        );
        assert_eq!(caps.default_encoding(), Some(EncodingFormat::Json));

        let plain = Capabilities::new([BASE_1_0]);
        assert_eq!(plain.supported_encodings(), vec![EncodingFormat::Xml]);
        assert_eq!(plain.default_encoding(), None);
    }

    #[test]
    fn test_advertised_modules() {
        let modules = caps().advertised_modules();
        assert_eq!(modules.len(), 1);
        assert_eq!(modules[0].name, "example-if");
        assert_eq!(modules[0].revision.as_deref(), Some("2024-01-01"));
        assert_eq!(modules[0].namespace, "urn:example:interfaces");
    }
}
