use async_trait::async_trait;
use bytes::Bytes;
use regex::Regex;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use tracing::{debug, info};

use super::archive::{decode_text, inspect_archive};
use super::{RemoteMetadata, RemoteMetadataSource};
use crate::config::RemoteConfig;
use crate::errors::{RemoteError, RemoteResult};
use crate::models::{DeviceKey, SourceOutcome};

pub const SOAP_ACTION: &str = "http://schemas.microsoft.com/windowsmetadata/services/2007/09/18/dms/DeviceMetadataService/GetDeviceMetadata";
pub const CLIENT_USER_AGENT: &str = "MICROSOFT_DEVICE_METADATA_RETRIEVAL_CLIENT";
const REQUEST_CONTENT_TYPE: &str = r#"text/xml; charset="UTF-16LE""#;
const FILENAME_PATTERN: &str = r"<fn>(.*\.devicemetadata-ms)</fn>";

/// Filename discovery request for `{vid}`/`{pid}` as four lowercase hex digits
fn request_body(key: DeviceKey) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-16"?>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xmlns:xsd="http://www.w3.org/2001/XMLSchema">
  <soap:Body>
    <GetDeviceMetadata xmlns="http://schemas.microsoft.com/windowsmetadata/services/2007/09/18/dms">
      <DeviceMetadataRequest>
        <HardwareIdList>
          <HardwareId>DOID:USB\VID_{vid}&amp;PID_{pid}</HardwareId>
        </HardwareIdList>
        <Locale>en-US</Locale>
      </DeviceMetadataRequest>
    </GetDeviceMetadata>
  </soap:Body>
</soap:Envelope>"#,
        vid = key.vendor_hex(),
        pid = key.product_hex(),
    )
}

fn encode_utf16le(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

/// Client for the Windows device metadata service
///
/// Discovery posts a SOAP request naming the device and reads the package file
/// name from the reply; the package itself is then fetched from the download host.
#[derive(Clone)]
pub struct DmsClient {
    http: reqwest::Client,
    service_url: String,
    download_url: String,
    filename_pattern: Regex,
}

impl DmsClient {
    pub fn new(config: &RemoteConfig) -> RemoteResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            http,
            service_url: config.service_url.clone(),
            download_url: config.download_url.clone(),
            filename_pattern: Regex::new(FILENAME_PATTERN)?,
        })
    }

    /// Package file name for a device; `None` when the service has nothing for it
    pub async fn discover_filename(&self, key: DeviceKey) -> RemoteResult<Option<String>> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(REQUEST_CONTENT_TYPE));
        headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));
        headers.insert("SOAPAction", HeaderValue::from_static(SOAP_ACTION));

        let response = self
            .http
            .post(&self.service_url)
            .headers(headers)
            .body(encode_utf16le(&request_body(key)))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            info!("Metadata service answered HTTP {} for {}", status.as_u16(), key);
            return Ok(None);
        }

        let body = response.bytes().await?;
        if body.is_empty() {
            info!("Metadata service returned an empty reply for {}", key);
            return Ok(None);
        }

        let text = decode_text(&body);
        let filename = self
            .filename_pattern
            .captures(&text)
            .and_then(|captures| captures.get(1))
            .map(|m| m.as_str().to_string());
        debug!("Discovered package {:?} for {}", filename, key);
        Ok(filename)
    }

    pub async fn download(&self, filename: &str) -> RemoteResult<Bytes> {
        let url = format!("{}{}", self.download_url, filename);
        let response = self.http.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(RemoteError::DownloadFailed {
                status: response.status().as_u16(),
                url,
            });
        }

        let body = response.bytes().await?;
        if body.is_empty() {
            return Err(RemoteError::EmptyDownload { url });
        }
        Ok(body)
    }

    /// Discover, download and unpack the device's metadata package
    pub async fn fetch_metadata(&self, key: DeviceKey) -> RemoteResult<Option<RemoteMetadata>> {
        let Some(filename) = self.discover_filename(key).await? else {
            return Ok(None);
        };

        let archive = self.download(&filename).await?;
        debug!("Downloaded {} ({} bytes) for {}", filename, archive.len(), key);

        let metadata = tokio::task::spawn_blocking(move || inspect_archive(&archive))
            .await
            .map_err(|e| RemoteError::Task {
                message: e.to_string(),
            })??;
        Ok(Some(metadata))
    }
}

#[async_trait]
impl RemoteMetadataSource for DmsClient {
    async fn fetch(&self, key: DeviceKey) -> SourceOutcome<RemoteMetadata> {
        self.fetch_metadata(key).await.into()
    }
}
