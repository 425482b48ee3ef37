//! Encoding selection
//!
//! Exactly one serialization format is picked per session, at construction.

use std::fmt;
use std::str::FromStr;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::capabilities::Capabilities;
use crate::error::{NetconfError, Result};

/// Serialization format of envelopes and data trees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodingFormat {
    /// NETCONF baseline
    #[default]
    Xml,
    /// RFC 7951 JSON
    Json,
}

impl fmt::Display for EncodingFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodingFormat::Xml => f.write_str("xml"),
            EncodingFormat::Json => f.write_str("json"),
        }
    }
}

impl FromStr for EncodingFormat {
    type Err = NetconfError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "xml" => Ok(EncodingFormat::Xml),
            "json" => Ok(EncodingFormat::Json),
            other => Err(NetconfError::Validation(format!(
                "unknown encoding '{}'",
                other
            ))),
        }
    }
}

/// Pick the session encoding
///
/// The requested format wins when the peer supports it. Otherwise the peer's
/// advertised default is used, and failing that XML.
pub fn select_encoding(requested: Option<EncodingFormat>, caps: &Capabilities) -> EncodingFormat {
    if let Some(format) = requested {
        if caps.supports_encoding(format) {
            debug!("using requested encoding {}", format);
            return format;
        }
        warn!(
            "peer does not advertise {} encoding, falling back",
            format
        );
    }

    match caps.default_encoding() {
        Some(format) if caps.supports_encoding(format) => {
            debug!("using peer default encoding {}", format);
            format
        }
        _ => EncodingFormat::Xml,
    }
}
