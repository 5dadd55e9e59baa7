use serde::{Deserialize, Deserializer};

/// Which media host the worker publishes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaHost {
    Cloudinary,
    R2,
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:8080"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Where the worker serves its Prometheus scrape endpoint
    #[serde(default = "default_worker_metrics_addr")]
    pub worker_metrics_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// Redis connection string for the job queues
    pub redis_url: String,

    /// Names this worker's in-flight lists. Required by the worker; must be
    /// unique per running worker and stable across its restarts, since a
    /// restarted worker returns whatever is left in its lists to the queue.
    #[serde(default)]
    pub worker_id: Option<String>,

    /// Directory holding staged uploads until a worker picks them up
    #[serde(default = "default_staging_dir")]
    pub staging_dir: String,

    /// Keep staged and compressed files after a successful upload (debugging)
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub keep_files: bool,

    /// Give up on a job after this many processing attempts; unset retries forever
    #[serde(default)]
    pub max_attempts: Option<u32>,

    /// Largest accepted request body in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    #[serde(default = "default_media_host")]
    pub media_host: MediaHost,

    #[serde(default)]
    pub cloudinary_cloud_name: String,

    #[serde(default)]
    pub cloudinary_api_key: String,

    #[serde(default)]
    pub cloudinary_api_secret: String,

    #[serde(default = "default_media_folder")]
    pub media_folder: String,

    /// R2 bucket name
    #[serde(default)]
    pub r2_bucket: String,

    /// R2 access key ID (S3-compatible)
    #[serde(default)]
    pub r2_access_key: String,

    /// R2 secret access key (S3-compatible)
    #[serde(default)]
    pub r2_secret_key: String,

    /// R2 endpoint URL
    #[serde(default)]
    pub r2_endpoint: String,

    /// Public URL the bucket is served from
    #[serde(default)]
    pub r2_public_url: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_worker_metrics_addr() -> String {
    "0.0.0.0:9091".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_staging_dir() -> String {
    "/tmp/media-pipeline".to_string()
}

fn default_max_upload_bytes() -> usize {
    50 * 1024 * 1024
}

fn default_media_host() -> MediaHost {
    MediaHost::Cloudinary
}

fn default_media_folder() -> String {
    "uploads".to_string()
}

/// Accepts "true"/"false" and "1"/"0".
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        other => Err(serde::de::Error::custom(format!(
            "expected true/false or 1/0, got '{other}'"
        ))),
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// `WORKER_ID`, which only worker processes need.
    pub fn require_worker_id(&self) -> Result<&str, envy::Error> {
        self.worker_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(envy::Error::MissingValue("worker_id"))
    }

    pub fn from_vars<I>(vars: I) -> Result<Self, envy::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::from_iter(vars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(extra: &[(&str, &str)]) -> Vec<(String, String)> {
        let mut v = vec![
            ("DATABASE_URL".to_string(), "postgres://localhost/media".to_string()),
            ("REDIS_URL".to_string(), "redis://localhost".to_string()),
        ];
        v.extend(extra.iter().map(|(k, val)| (k.to_string(), val.to_string())));
        v
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_vars(vars(&[])).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.worker_metrics_addr, "0.0.0.0:9091");
        assert!(!config.keep_files);
        assert_eq!(config.max_attempts, None);
        assert_eq!(config.media_host, MediaHost::Cloudinary);
        assert_eq!(config.max_upload_bytes, 50 * 1024 * 1024);
    }

    #[test]
    fn test_worker_id_has_no_shared_default() {
        let config = AppConfig::from_vars(vars(&[])).unwrap();
        assert_eq!(config.worker_id, None);
        assert!(config.require_worker_id().is_err());

        let config = AppConfig::from_vars(vars(&[("WORKER_ID", "  ")])).unwrap();
        assert!(config.require_worker_id().is_err());

        let config = AppConfig::from_vars(vars(&[("WORKER_ID", "media-worker-2")])).unwrap();
        assert_eq!(config.require_worker_id().unwrap(), "media-worker-2");
    }

    #[test]
    fn test_keep_files_accepts_one() {
        let config = AppConfig::from_vars(vars(&[("KEEP_FILES", "1")])).unwrap();
        assert!(config.keep_files);
        let config = AppConfig::from_vars(vars(&[("KEEP_FILES", "true")])).unwrap();
        assert!(config.keep_files);
        assert!(AppConfig::from_vars(vars(&[("KEEP_FILES", "maybe")])).is_err());
    }

    #[test]
    fn test_media_host_and_retry_limit() {
        let config =
            AppConfig::from_vars(vars(&[("MEDIA_HOST", "r2"), ("MAX_ATTEMPTS", "5")])).unwrap();
        assert_eq!(config.media_host, MediaHost::R2);
        assert_eq!(config.max_attempts, Some(5));
    }

    #[test]
    fn test_missing_database_url() {
        let only_redis = vec![("REDIS_URL".to_string(), "redis://localhost".to_string())];
        assert!(AppConfig::from_vars(only_redis).is_err());
    }
}
