//! HTTPS transport backed by a blocking reqwest client
//!
//! Every connection trusts only the certificate supplied with the update
//! descriptor; the platform root store is not consulted.
//!
//! The connect timeout bounds the TLS handshake alone. Body reads are
//! bounded only by the download limit, which covers the whole request and
//! must be sized for the largest image over the slowest expected link.

use std::io::Read;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::Certificate;
use tracing::debug;
use twin_ota::{Connection, ResponseHeaders, Transport, TransportError, TrustMaterial};

/// Opens pinned HTTPS connections
#[derive(Debug, Clone)]
pub struct HttpsTransport {
    connect_timeout: Duration,
    download_timeout: Duration,
}

impl HttpsTransport {
    pub fn new(connect_timeout: Duration, download_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            download_timeout,
        }
    }
}

impl Transport for HttpsTransport {
    type Connection = HttpsConnection;

    fn open(&mut self, url: &str, trust: &TrustMaterial) -> Result<HttpsConnection, TransportError> {
        let certificate = Certificate::from_pem(trust.as_bytes())
            .map_err(|e| TransportError::Connect(format!("invalid trust material: {e}")))?;
        let client = Client::builder()
            .tls_built_in_root_certs(false)
            .add_root_certificate(certificate)
            .connect_timeout(self.connect_timeout)
            .timeout(self.download_timeout)
            .build()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        debug!(url, "HTTPS client ready");
        Ok(HttpsConnection {
            client,
            url: url.to_string(),
            response: None,
        })
    }
}

/// One HTTPS GET request
#[derive(Debug)]
pub struct HttpsConnection {
    client: Client,
    url: String,
    response: Option<Response>,
}

impl Connection for HttpsConnection {
    fn fetch_headers(&mut self) -> Result<ResponseHeaders, TransportError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Response(format!(
                "server answered {status}"
            )));
        }
        let headers = ResponseHeaders {
            status: Some(status.as_u16()),
            content_length: response.content_length(),
        };
        self.response = Some(response);
        Ok(headers)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let response = self.response.as_mut().ok_or_else(|| {
            TransportError::Response("body requested before headers".to_string())
        })?;
        Ok(response.read(buf)?)
    }

    fn close(&mut self) {
        self.response = None;
        debug!(url = %self.url, "HTTPS connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn refused_connection_is_a_connect_failure() -> TestResult {
        let port = TcpListener::bind("127.0.0.1:0")?.local_addr()?.port();
        let trust = TrustMaterial::new("-----BEGIN CERTIFICATE-----\n-----END CERTIFICATE-----\n")?;
        let mut transport = HttpsTransport::new(Duration::from_secs(1), Duration::from_secs(5));

        let result = transport
            .open(&format!("https://127.0.0.1:{port}/app.bin"), &trust)
            .and_then(|mut connection| connection.fetch_headers());
        assert!(matches!(result, Err(TransportError::Connect(_))));
        Ok(())
    }
}
