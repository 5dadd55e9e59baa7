//! Media host clients. Given bytes, return a stable public URL.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::multipart;
use serde::Deserialize;
use sha1::{Digest, Sha1};

/// Bytes to publish on the media host.
#[derive(Debug, Clone)]
pub struct UploadObject {
    /// Object name without directories, e.g. "0b7e...jpg".
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait MediaUploader: Send + Sync {
    /// Publish `object` and return its public URL.
    async fn upload(&self, object: &UploadObject) -> Result<String, UploadError>;
}

/// Cloudinary signed upload API.
pub struct CloudinaryUploader {
    http: reqwest::Client,
    cloud_name: String,
    api_key: String,
    api_secret: String,
    folder: String,
    transformation: String,
}

#[derive(Deserialize)]
struct CloudinaryResponse {
    secure_url: Option<String>,
    error: Option<CloudinaryErrorBody>,
}

#[derive(Deserialize)]
struct CloudinaryErrorBody {
    message: String,
}

impl CloudinaryUploader {
    pub fn new(
        cloud_name: &str,
        api_key: &str,
        api_secret: &str,
        folder: &str,
    ) -> Result<Self, UploadError> {
        if cloud_name.is_empty() || api_key.is_empty() || api_secret.is_empty() {
            return Err(UploadError::Config(
                "CLOUDINARY_CLOUD_NAME, CLOUDINARY_API_KEY and CLOUDINARY_API_SECRET are required"
                    .to_string(),
            ));
        }

        Ok(Self {
            http: reqwest::Client::new(),
            cloud_name: cloud_name.to_string(),
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
            folder: folder.to_string(),
            // Auto quality, auto format, max width 1280
            transformation: "q_auto,f_auto,w_1280".to_string(),
        })
    }

    fn signed_params(&self, timestamp: i64) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("folder", self.folder.clone()),
            ("timestamp", timestamp.to_string()),
            ("transformation", self.transformation.clone()),
        ];
        params.sort_by_key(|(k, _)| *k);
        params
    }
}

/// Cloudinary request signature: SHA-1 over the sorted `k=v` pairs joined by
/// `&`, followed by the API secret.
pub fn cloudinary_signature(params: &[(&str, String)], api_secret: &str) -> String {
    let to_sign = params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Sha1::new();
    hasher.update(to_sign.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}

#[async_trait]
impl MediaUploader for CloudinaryUploader {
    async fn upload(&self, object: &UploadObject) -> Result<String, UploadError> {
        let url = format!(
            "https://api.cloudinary.com/v1_1/{}/image/upload",
            self.cloud_name
        );

        let params = self.signed_params(chrono::Utc::now().timestamp());
        let signature = cloudinary_signature(&params, &self.api_secret);

        let file = multipart::Part::bytes(object.bytes.clone())
            .file_name(object.name.clone())
            .mime_str(&object.content_type)
            .map_err(UploadError::Http)?;

        let mut form = multipart::Form::new()
            .part("file", file)
            .text("api_key", self.api_key.clone())
            .text("signature", signature);
        for (key, value) in params {
            form = form.text(key, value);
        }

        let response = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(UploadError::Http)?;

        let status = response.status();
        let body: CloudinaryResponse = response.json().await.map_err(UploadError::Http)?;

        match (body.secure_url, body.error) {
            (Some(secure_url), _) if status.is_success() => Ok(secure_url),
            (_, Some(err)) => Err(UploadError::Rejected(err.message)),
            _ => Err(UploadError::Rejected(format!(
                "media host answered {status} without a URL"
            ))),
        }
    }
}

type FailRule = Box<dyn Fn(&UploadObject) -> bool + Send + Sync>;

/// Uploader that keeps objects in memory and hands out `memory://` URLs.
pub struct MemoryUploader {
    uploaded: Mutex<Vec<UploadObject>>,
    scripted_failures: Mutex<VecDeque<bool>>,
    fail_rule: Mutex<Option<FailRule>>,
}

impl Default for MemoryUploader {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryUploader {
    pub fn new() -> Self {
        Self {
            uploaded: Mutex::new(Vec::new()),
            scripted_failures: Mutex::new(VecDeque::new()),
            fail_rule: Mutex::new(None),
        }
    }

    /// Reject every upload for which `rule` returns true.
    pub fn fail_when(&self, rule: impl Fn(&UploadObject) -> bool + Send + Sync + 'static) {
        *self.fail_rule.lock() = Some(Box::new(rule));
    }

    pub fn fail_always(&self) {
        self.fail_when(|_| true);
    }

    /// Stop rejecting uploads.
    pub fn heal(&self) {
        *self.fail_rule.lock() = None;
        self.scripted_failures.lock().clear();
    }

    /// Reject the next `n` uploads, then go back to normal.
    pub fn fail_next(&self, n: usize) {
        self.scripted_failures.lock().extend(std::iter::repeat(true).take(n));
    }

    pub fn uploaded(&self) -> Vec<UploadObject> {
        self.uploaded.lock().clone()
    }
}

#[async_trait]
impl MediaUploader for MemoryUploader {
    async fn upload(&self, object: &UploadObject) -> Result<String, UploadError> {
        let scripted = self.scripted_failures.lock().pop_front().unwrap_or(false);
        let ruled = self
            .fail_rule
            .lock()
            .as_ref()
            .is_some_and(|rule| rule(object));
        if scripted || ruled {
            return Err(UploadError::Rejected(format!("upload of {} refused", object.name)));
        }

        let mut uploaded = self.uploaded.lock();
        uploaded.push(object.clone());
        Ok(format!("memory://media/{}/{}", uploaded.len(), object.name))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Media host rejected upload: {0}")]
    Rejected(String),

    #[error("Object storage error: {0}")]
    Storage(#[from] s3::error::S3Error),

    #[error("Media host configuration error: {0}")]
    Config(String),
}
