//! Gallery API client.
//!
//! Async HTTP client using `reqwest` with Bearer token authentication.
//! Negotiation and completion calls use a short timeout; byte transfers get a
//! long one so large parts on slow links are not cut off.

use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, ETAG, HeaderMap, HeaderValue};
use tracing::debug;

use crate::types::{
    CompleteMultipartRequest, CreateAssetRequest, MultipartTicket, SinglePartTicket,
};

const DEFAULT_BASE_URL: &str = "https://api.shuttersync.io/v1";

const NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(30);
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Errors from the gallery API client.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage response carried no etag")]
    MissingEtag,

    #[error("invalid access token")]
    InvalidToken,
}

/// Gallery API client.
pub struct GalleryClient {
    http: reqwest::Client,
    base_url: String,
}

impl GalleryClient {
    /// Creates a new client authenticated with the given access token.
    pub fn new(access_token: &str) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {access_token}"))
                .map_err(|_| ApiError::InvalidToken)?,
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Sets a custom base URL (for testing).
    #[cfg(test)]
    pub(crate) fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    /// Posts the asset-creation request and returns the raw response body.
    async fn post_asset(&self, req: &CreateAssetRequest) -> Result<Vec<u8>, ApiError> {
        let url = format!("{}/assets", self.base_url);
        let resp = self
            .http
            .post(&url)
            .timeout(NEGOTIATION_TIMEOUT)
            .json(req)
            .send()
            .await?;
        let status = resp.status();

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(resp.bytes().await?.to_vec())
    }

    /// Negotiates a single-part upload and returns its form ticket.
    pub async fn create_single(
        &self,
        req: &CreateAssetRequest,
    ) -> Result<SinglePartTicket, ApiError> {
        let body = self.post_asset(req).await?;
        let ticket: SinglePartTicket = serde_json::from_slice(&body)?;
        debug!(name = %req.name, "single-part asset negotiated");
        Ok(ticket)
    }

    /// Negotiates a multipart upload and returns its part destinations.
    pub async fn create_multipart(
        &self,
        req: &CreateAssetRequest,
    ) -> Result<MultipartTicket, ApiError> {
        let body = self.post_asset(req).await?;
        let ticket: MultipartTicket = serde_json::from_slice(&body)?;
        debug!(
            name = %req.name,
            destinations = ticket.part_urls.len(),
            "multipart asset negotiated"
        );
        Ok(ticket)
    }

    /// PUTs one chunk to its presigned destination and returns the ETag.
    ///
    /// Storage wraps the token in quotes; they are stripped before return.
    pub async fn upload_part(&self, url: &str, data: Bytes) -> Result<String, ApiError> {
        let len = data.len();
        let resp = self
            .http
            .put(url)
            .timeout(TRANSFER_TIMEOUT)
            .body(data)
            .send()
            .await?;
        let status = resp.status();

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let etag = resp
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim_matches('"').to_string())
            .unwrap_or_default();

        if etag.is_empty() {
            return Err(ApiError::MissingEtag);
        }

        debug!(len, etag = %etag, "part stored");
        Ok(etag)
    }

    /// POSTs a whole file as one form-encoded upload.
    ///
    /// The negotiated fields go ahead of the file part; storage validates
    /// them against the signed policy before accepting the bytes.
    pub async fn upload_form(
        &self,
        ticket: &SinglePartTicket,
        file_name: &str,
        data: Bytes,
    ) -> Result<(), ApiError> {
        let len = data.len() as u64;
        let mut form = reqwest::multipart::Form::new();
        for (key, value) in &ticket.fields {
            form = form.text(key.clone(), value.clone());
        }
        let part = reqwest::multipart::Part::stream_with_length(reqwest::Body::from(data), len)
            .file_name(file_name.to_string());
        form = form.part("file", part);

        let resp = self
            .http
            .post(&ticket.upload_url)
            .timeout(TRANSFER_TIMEOUT)
            .multipart(form)
            .send()
            .await?;
        let status = resp.status();

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Api {
                status: status.as_u16(),
                body,
            });
        }

        debug!(len, "single-part upload stored");
        Ok(())
    }

    /// Finalizes a multipart upload from its recorded parts.
    pub async fn complete_multipart(
        &self,
        req: &CompleteMultipartRequest,
    ) -> Result<(), ApiError> {
        let url = format!("{}/multipart_uploads/complete", self.base_url);
        let resp = self
            .http
            .post(&url)
            .timeout(NEGOTIATION_TIMEOUT)
            .json(req)
            .send()
            .await?;
        let status = resp.status();

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Api {
                status: status.as_u16(),
                body,
            });
        }

        debug!(upload_id = %req.upload_id, parts = req.parts.len(), "multipart completed");
        Ok(())
    }
}
