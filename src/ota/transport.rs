use embedded_svc::http::Method;
use esp_idf_svc::http::client::{Configuration as HttpConfig, EspHttpConnection};
use esp_idf_svc::sys::{EspError, ESP_ERR_HTTP_CONNECT, ESP_ERR_HTTP_EAGAIN, ESP_ERR_TIMEOUT};
use std::time::Duration;
use update_core::{Transport, TransportError};

const BUFFER_SIZE: usize = 4096;

fn transport_error(e: EspError) -> TransportError {
    let code = e.code();
    if code == ESP_ERR_TIMEOUT as i32 || code == ESP_ERR_HTTP_EAGAIN as i32 {
        TransportError::timed_out()
    } else if code == ESP_ERR_HTTP_CONNECT as i32 {
        TransportError::connection_failed()
    } else {
        log::debug!("HTTP client error: {}", e);
        TransportError::invalid_response()
    }
}

/// One GET exchange with the update server over `EspHttpConnection`.
///
/// The connection is created in `begin_request` so that the response
/// timeout set beforehand applies to it.
pub struct EspHttpTransport {
    url: String,
    timeout: Duration,
    connection: Option<EspHttpConnection>,
    request_headers: Vec<(String, String)>,
}

impl EspHttpTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: Duration::from_secs(8),
            connection: None,
            request_headers: Vec::new(),
        }
    }

    fn connection(&mut self) -> Result<&mut EspHttpConnection, TransportError> {
        self.connection.as_mut().ok_or(TransportError::new(TransportError::API))
    }
}

impl Transport for EspHttpTransport {
    fn begin_request(&mut self) -> Result<(), TransportError> {
        let config = HttpConfig {
            buffer_size: Some(BUFFER_SIZE),
            timeout: Some(self.timeout),
            ..Default::default()
        };
        let connection = EspHttpConnection::new(&config).map_err(|e| {
            log::error!("Failed to create HTTP connection: {:?}", e);
            TransportError::connection_failed()
        })?;
        self.connection = Some(connection);
        self.request_headers.clear();
        Ok(())
    }

    fn send_header(&mut self, name: &str, value: &str) -> Result<(), TransportError> {
        if self.connection.is_none() {
            return Err(TransportError::new(TransportError::API));
        }
        self.request_headers.push((name.to_string(), value.to_string()));
        Ok(())
    }

    fn end_request(&mut self) -> Result<u16, TransportError> {
        let headers: Vec<(&str, &str)> = self
            .request_headers
            .iter()
            .map(|(n, v)| (n.as_str(), v.as_str()))
            .collect();
        let connection = self.connection.as_mut().ok_or(TransportError::new(TransportError::API))?;
        log::info!("GET {}", self.url);
        connection
            .initiate_request(Method::Get, &self.url, &headers)
            .map_err(transport_error)?;
        connection.initiate_response().map_err(transport_error)?;
        Ok(connection.status())
    }

    fn content_length(&self) -> Option<u64> {
        self.connection
            .as_ref()
            .and_then(|c| c.header("Content-Length"))
            .and_then(|len| len.trim().parse().ok())
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.connection.as_ref().and_then(|c| c.header(name))
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.connection()?.read(buf).map_err(transport_error)
    }

    fn set_response_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }
}
