use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};

use crate::services::uploader::{MediaUploader, UploadError, UploadObject};

/// Media host backed by Cloudflare R2 (or any S3-compatible bucket) with a
/// public read URL in front of it.
pub struct R2Client {
    bucket: Box<Bucket>,
    public_base_url: String,
    key_prefix: String,
}

impl R2Client {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
        public_base_url: &str,
        key_prefix: &str,
    ) -> Result<Self, UploadError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| UploadError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| UploadError::Config(e.to_string()))?;

        Ok(Self {
            bucket,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            key_prefix: key_prefix.trim_matches('/').to_string(),
        })
    }

    fn object_key(&self, name: &str) -> String {
        if self.key_prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.key_prefix, name)
        }
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key)
    }
}

#[async_trait]
impl MediaUploader for R2Client {
    async fn upload(&self, object: &UploadObject) -> Result<String, UploadError> {
        let key = self.object_key(&object.name);
        let response = self
            .bucket
            .put_object_with_content_type(&key, &object.bytes, &object.content_type)
            .await
            .map_err(UploadError::Storage)?;

        let code = response.status_code();
        if !(200..300).contains(&code) {
            return Err(UploadError::Rejected(format!(
                "object storage answered {code} for {key}"
            )));
        }

        Ok(self.public_url(&key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(prefix: &str) -> R2Client {
        R2Client::new(
            "media",
            "https://account.r2.cloudflarestorage.com",
            "access",
            "secret",
            "https://media.example.com/",
            prefix,
        )
        .unwrap()
    }

    #[test]
    fn test_public_url_joins_prefix() {
        let r2 = client("/uploads/");
        let key = r2.object_key("a.jpg");
        assert_eq!(key, "uploads/a.jpg");
        assert_eq!(r2.public_url(&key), "https://media.example.com/uploads/a.jpg");
    }

    #[test]
    fn test_empty_prefix() {
        assert_eq!(client("").object_key("a.jpg"), "a.jpg");
    }
}
