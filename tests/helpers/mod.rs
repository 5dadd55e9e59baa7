//! Helpers for driving a running API server over HTTP.

use std::io::Cursor;
use std::time::Duration;

use image::{ImageBuffer, ImageFormat, Rgb};
use reqwest::multipart;
use serde::Deserialize;
use tokio::time::sleep;
use uuid::Uuid;

/// Response from POST /api/upload
#[derive(Debug, Deserialize)]
pub struct UploadResponse {
    pub post_id: Uuid,
    pub status: String,
    pub file_paths: Vec<String>,
}

/// Response from POST /api/upload-binary
#[derive(Debug, Deserialize)]
pub struct BinaryUploadResponse {
    pub job_id: Uuid,
    pub status: String,
}

/// Response from GET /api/upload-status/{job_id}
#[derive(Debug, Deserialize)]
pub struct UploadStatusResponse {
    pub job_id: Uuid,
    pub status: String,
    pub image_urls: Vec<String>,
    pub error: Option<String>,
}

/// Encode a small gradient in `format`.
pub fn sample_image(format: ImageFormat) -> Vec<u8> {
    let img = ImageBuffer::from_fn(64, 48, |x, y| Rgb([(x * 4) as u8, (y * 5) as u8, 128]));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, format).expect("encode sample image");
    buf.into_inner()
}

/// Submit a multi-file post under the `images` field.
pub async fn upload_post(
    client: &reqwest::Client,
    base_url: &str,
    title: &str,
    files: Vec<(&str, Vec<u8>)>,
) -> Result<UploadResponse, Box<dyn std::error::Error>> {
    let mut form = multipart::Form::new().text("title", title.to_string());
    for (file_name, bytes) in files {
        form = form.part(
            "images",
            multipart::Part::bytes(bytes).file_name(file_name.to_string()),
        );
    }

    let response = client
        .post(format!("{}/api/upload", base_url))
        .multipart(form)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await?;
        return Err(format!("Upload failed with status {}: {}", status, error_text).into());
    }

    Ok(response.json::<UploadResponse>().await?)
}

/// Submit a raw body to the binary endpoint.
pub async fn upload_binary(
    client: &reqwest::Client,
    base_url: &str,
    content_type: &str,
    bytes: Vec<u8>,
) -> Result<BinaryUploadResponse, Box<dyn std::error::Error>> {
    let response = client
        .post(format!("{}/api/upload-binary", base_url))
        .header(reqwest::header::CONTENT_TYPE, content_type)
        .body(bytes)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await?;
        return Err(format!("Upload failed with status {}: {}", status, error_text).into());
    }

    Ok(response.json::<BinaryUploadResponse>().await?)
}

/// Poll the status endpoint until the job completes or fails.
///
/// A post whose uploads all fail stays `processing` while it is requeued, so
/// that case ends in the timeout error.
pub async fn poll_job_status(
    client: &reqwest::Client,
    base_url: &str,
    job_id: Uuid,
    timeout_secs: u64,
) -> Result<UploadStatusResponse, Box<dyn std::error::Error>> {
    let max_attempts = timeout_secs * 2;

    for attempt in 0..max_attempts {
        let response = client
            .get(format!("{}/api/upload-status/{}", base_url, job_id))
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(format!("Status check failed: {}", error_text).into());
        }

        let status_response = response.json::<UploadStatusResponse>().await?;

        match status_response.status.as_str() {
            "completed" | "failed" => return Ok(status_response),
            "pending" | "processing" => {
                if attempt % 10 == 0 && attempt > 0 {
                    println!("  ... still waiting (attempt {}/{})", attempt, max_attempts);
                }
                sleep(Duration::from_millis(500)).await;
            }
            other => return Err(format!("Unknown job status: {}", other).into()),
        }
    }

    Err(format!("Job did not finish within {} seconds", timeout_secs).into())
}

pub async fn wait_for_job(
    client: &reqwest::Client,
    base_url: &str,
    job_id: Uuid,
) -> Result<UploadStatusResponse, Box<dyn std::error::Error>> {
    poll_job_status(client, base_url, job_id, 120).await
}
