//! Update server URL construction

use std::fmt::Write;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateEndpoint {
    pub base_url: String,
    pub api_key: String,
}

impl UpdateEndpoint {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// `<base>?k=<key>&v=<version>&s=<device>`, appended with `&` if the base
    /// already carries a query.
    pub fn url(&self, version: &str, device_id: &str) -> String {
        let separator = if self.base_url.contains('?') { '&' } else { '?' };
        format!(
            "{}{}k={}&v={}&s={}",
            self.base_url,
            separator,
            percent_encode(&self.api_key),
            percent_encode(version),
            percent_encode(device_id)
        )
    }
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
pub fn percent_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for b in value.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
            out.push(b as char);
        } else {
            let _ = write!(out, "%{:02X}", b);
        }
    }
    out
}
