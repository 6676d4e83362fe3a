//! Turn a catalog locator into an object key.
//!
//! The catalog stores either a full public URL
//! (`https://<bucket>.cos.<region>.myqcloud.com/<key>`, or any other
//! `http(s)://host/<key>`) or a bare key. The key is the percent-decoded path
//! without its leading slash, and objects keep the same key at the destination.

use crate::error::{FerryError, Result};
use crate::store::check_key;
use percent_encoding::percent_decode_str;
use regex::Regex;
use std::sync::OnceLock;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    /// Bucket named in a COS virtual-host URL.
    pub bucket: Option<String>,
    /// Region named in a COS virtual-host URL.
    pub region: Option<String>,
    pub key: String,
}

fn cos_host_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<bucket>[^.]+)\.cos\.(?P<region>[^.]+)\.myqcloud\.com$")
            .expect("valid regex")
    })
}

pub fn parse(locator: &str) -> Result<Locator> {
    let raw = locator.trim();
    let invalid = |reason: &str| FerryError::InvalidLocator {
        locator: locator.to_string(),
        reason: reason.to_string(),
    };
    if raw.is_empty() {
        return Err(invalid("empty"));
    }

    let (bucket, region, encoded_path) = if raw.contains("://") {
        let url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid("only http and https URLs are supported"));
        }
        let host = url.host_str().unwrap_or_default();
        let (bucket, region) = match cos_host_re().captures(host) {
            Some(caps) => (
                caps.name("bucket").map(|m| m.as_str().to_string()),
                caps.name("region").map(|m| m.as_str().to_string()),
            ),
            None => (None, None),
        };
        (bucket, region, url.path().to_string())
    } else {
        (None, None, raw.to_string())
    };

    let decoded = percent_decode_str(encoded_path.trim_start_matches('/'))
        .decode_utf8()
        .map_err(|_| invalid("path is not valid UTF-8"))?
        .into_owned();
    if decoded.is_empty() {
        return Err(invalid("no object key in path"));
    }
    check_key(&decoded).map_err(|_| invalid("object key is not a safe relative path"))?;

    Ok(Locator {
        bucket,
        region,
        key: decoded,
    })
}

/// Object key for `locator`; the destination reuses it unchanged.
pub fn object_key(locator: &str) -> Result<String> {
    parse(locator).map(|l| l.key)
}
