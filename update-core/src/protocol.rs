//! Update negotiation: identification headers out, status dispatch back.

use crate::config::UpdateConfig;
use crate::error::UpdateError;
use crate::identity::DeviceIdentity;
use crate::storage::TargetKind;
use crate::transport::Transport;
use base64::{engine::general_purpose::STANDARD, Engine as _};

pub const HEADER_FREE_SPACE: &str = "x-ESP32-free-space";
pub const HEADER_SKETCH_SIZE: &str = "x-ESP32-sketch-size";
pub const HEADER_SKETCH_MD5: &str = "x-ESP32-sketch-md5";
pub const HEADER_SKETCH_SHA256: &str = "x-ESP32-sketch-sha256";
pub const HEADER_CHIP_SIZE: &str = "x-ESP32-chip-size";
pub const HEADER_SDK_VERSION: &str = "x-ESP32-sdk-version";
pub const HEADER_MODE: &str = "x-ESP32-mode";
pub const HEADER_VERSION: &str = "x-ESP32-version";

/// Response header carrying the expected MD5 of the body.
pub const HEADER_RESPONSE_MD5: &str = "x-MD5";

pub const STATUS_OK: u16 = 200;
pub const STATUS_NOT_MODIFIED: u16 = 304;
pub const STATUS_FORBIDDEN: u16 = 403;
pub const STATUS_NOT_FOUND: u16 = 404;

/// What the server answered, before any interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub content_length: Option<u64>,
    /// Trimmed, lower-cased `x-MD5` value. `None` when absent or empty.
    pub md5: Option<String>,
}

/// Result of a successful negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Negotiation {
    /// The server has an image of `declared_len` bytes for us.
    Proceed {
        declared_len: u64,
        md5: Option<String>,
    },
    /// The server says we are up to date.
    NotModified,
}

/// Identification headers in the order they go on the wire.
pub fn request_headers(
    identity: &DeviceIdentity,
    target: TargetKind,
    current_version: &str,
    config: &UpdateConfig,
) -> Vec<(&'static str, String)> {
    let mut headers = Vec::with_capacity(10);

    if let Some(auth) = &config.credentials {
        let token = STANDARD.encode(format!("{}:{}", auth.user, auth.password));
        headers.push(("Authorization", format!("Basic {}", token)));
    }
    headers.push(("Cache-Control", "no-cache".to_string()));
    headers.push((HEADER_FREE_SPACE, identity.free_space(target).to_string()));
    headers.push((HEADER_SKETCH_SIZE, identity.sketch_size.to_string()));
    if let Some(md5) = identity.sketch_md5.as_deref().filter(|v| !v.is_empty()) {
        headers.push((HEADER_SKETCH_MD5, md5.to_string()));
    }
    if let Some(sha256) = identity.sketch_sha256.as_deref().filter(|v| !v.is_empty()) {
        headers.push((HEADER_SKETCH_SHA256, sha256.to_ascii_uppercase()));
    }
    headers.push((HEADER_CHIP_SIZE, identity.chip_size.to_string()));
    headers.push((HEADER_SDK_VERSION, identity.sdk_version.clone()));
    headers.push((HEADER_MODE, target.mode().to_string()));
    if !current_version.is_empty() {
        headers.push((HEADER_VERSION, current_version.to_string()));
    }

    headers
}

/// Send the update request and collect the response head.
///
/// Transport failures are returned as-is; the status is not interpreted.
pub fn send_request<T: Transport + ?Sized>(
    transport: &mut T,
    identity: &DeviceIdentity,
    target: TargetKind,
    current_version: &str,
    config: &UpdateConfig,
) -> Result<Response, UpdateError> {
    transport.set_response_timeout(config.response_timeout());

    transport.begin_request().map_err(|e| {
        log::error!("HTTP error: {}", e);
        UpdateError::Transport(e)
    })?;

    for (name, value) in request_headers(identity, target, current_version, config) {
        log::debug!("> {}: {}", name, value);
        transport.send_header(name, &value)?;
    }

    let status = transport.end_request().map_err(|e| {
        log::error!("HTTP error: {}", e);
        UpdateError::Transport(e)
    })?;

    let md5 = transport
        .header(HEADER_RESPONSE_MD5)
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty());
    if let Some(md5) = &md5 {
        log::debug!("{} = \"{}\"", HEADER_RESPONSE_MD5, md5);
    }

    let response = Response {
        status,
        content_length: transport.content_length(),
        md5,
    };

    log::debug!("Server header:");
    log::debug!(" - code: {}", response.status);
    log::debug!(" - len: {:?}", response.content_length);
    log::debug!("Device info:");
    log::debug!(" - free space: {}", identity.free_space(target));
    log::debug!(" - current image size: {}", identity.sketch_size);
    if !current_version.is_empty() {
        log::debug!(" - current version: {}", current_version);
    }

    Ok(response)
}

/// Map a response onto the next step of the update.
pub fn dispatch(response: &Response) -> Result<Negotiation, UpdateError> {
    match response.status {
        STATUS_OK => match response.content_length {
            Some(len) if len > 0 => Ok(Negotiation::Proceed {
                declared_len: len,
                md5: response.md5.clone(),
            }),
            _ => {
                log::error!("Content-Length was 0 or wasn't set by server");
                Err(UpdateError::ServerDidNotReportSize)
            }
        },
        STATUS_NOT_MODIFIED => Ok(Negotiation::NotModified),
        STATUS_NOT_FOUND => Err(UpdateError::ServerFileNotFound),
        STATUS_FORBIDDEN => Err(UpdateError::ServerForbidden),
        other => {
            log::error!("HTTP code is ({})", other);
            Err(UpdateError::ServerWrongStatusCode)
        }
    }
}

pub fn negotiate<T: Transport + ?Sized>(
    transport: &mut T,
    identity: &DeviceIdentity,
    target: TargetKind,
    current_version: &str,
    config: &UpdateConfig,
) -> Result<Negotiation, UpdateError> {
    let response = send_request(transport, identity, target, current_version, config)?;
    dispatch(&response)
}
