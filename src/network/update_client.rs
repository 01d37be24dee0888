// Update-server protocol client.
//
// The server publishes a version document, a firmware list, and raw
// firmware images:
//
//   GET <base>/version.json   -> { "version": "1.4.0", "url"?, "size"?, "checksum"? }
//   GET <base>/firmware/list  -> [ { "file": "panel-1.4.0.bin", "version"?, "size"? } ]
//   GET <base>/<file>         -> image bytes, Content-Length required

use std::io::Read;
use std::time::Duration;

use serde::Deserialize;

use crate::ota::OtaError;

/// Version document published by the update server.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub checksum: Option<String>,
}

/// One downloadable image in the server's firmware list.
#[derive(Debug, Clone, Deserialize)]
pub struct FirmwareEntry {
    pub file: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

/// Open firmware download: declared length plus the byte stream.
pub struct FirmwareDownload {
    pub content_length: u64,
    pub body: Box<dyn Read + Send>,
}

/// Client side of the update-server protocol. The HTTP implementation
/// below is used on the device; tests substitute an in-memory server.
pub trait UpdateServer: Send + Sync {
    fn fetch_version_info(&self, base_url: &str) -> Result<VersionInfo, OtaError>;
    fn fetch_firmware_list(&self, base_url: &str) -> Result<Vec<FirmwareEntry>, OtaError>;
    fn fetch_firmware(&self, base_url: &str, file: &str) -> Result<FirmwareDownload, OtaError>;
}

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// reqwest-backed client.
pub struct HttpUpdateServer {
    client: reqwest::blocking::Client,
}

impl HttpUpdateServer {
    pub fn new() -> Result<Self, OtaError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| OtaError::HttpFailure(err.to_string()))?;
        Ok(Self { client })
    }

    fn get(&self, url: &str) -> Result<reqwest::blocking::Response, OtaError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| OtaError::HttpFailure(format!("GET {url}: {err}")))?;
        if !response.status().is_success() {
            return Err(OtaError::HttpFailure(format!(
                "GET {url}: HTTP {}",
                response.status().as_u16()
            )));
        }
        Ok(response)
    }

    fn get_text(&self, url: &str) -> Result<String, OtaError> {
        let body = self
            .get(url)?
            .text()
            .map_err(|err| OtaError::HttpFailure(format!("GET {url}: {err}")))?;
        if body.trim().is_empty() {
            return Err(OtaError::HttpFailure(format!("GET {url}: empty body")));
        }
        Ok(body)
    }
}

fn join(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

impl UpdateServer for HttpUpdateServer {
    fn fetch_version_info(&self, base_url: &str) -> Result<VersionInfo, OtaError> {
        let url = join(base_url, "version.json");
        let body = self.get_text(&url)?;
        let info: VersionInfo = serde_json::from_str(&body)
            .map_err(|err| OtaError::ParseFailure(format!("version document: {err}")))?;
        if info.version.trim().is_empty() {
            return Err(OtaError::ParseFailure(
                "version document: empty version field".into(),
            ));
        }
        Ok(info)
    }

    fn fetch_firmware_list(&self, base_url: &str) -> Result<Vec<FirmwareEntry>, OtaError> {
        let url = join(base_url, "firmware/list");
        let body = self.get_text(&url)?;
        serde_json::from_str(&body)
            .map_err(|err| OtaError::ParseFailure(format!("firmware list: {err}")))
    }

    fn fetch_firmware(&self, base_url: &str, file: &str) -> Result<FirmwareDownload, OtaError> {
        let url = join(base_url, file);
        let response = self.get(&url)?;
        let content_length = response.content_length().unwrap_or(0);
        if content_length == 0 {
            return Err(OtaError::HttpFailure(format!(
                "GET {url}: missing or zero Content-Length"
            )));
        }
        Ok(FirmwareDownload {
            content_length,
            body: Box::new(response),
        })
    }
}
