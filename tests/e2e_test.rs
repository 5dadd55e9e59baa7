//! End-to-end tests against a running deployment
//!
//! These tests require:
//! 1. PostgreSQL running (migrations are applied by the server)
//! 2. Redis running
//! 3. API server running
//! 4. Worker process running with media host credentials configured
//!
//! Run with: cargo test --test e2e_test -- --ignored --nocapture
//!
//! Set API_BASE_URL to override the default (http://localhost:8080)

mod helpers;

use helpers::*;
use image::ImageFormat;

fn get_base_url() -> String {
    std::env::var("API_BASE_URL").unwrap_or_else(|_| "http://localhost:8080".to_string())
}

#[tokio::test]
#[ignore] // Requires running API server and its dependencies
async fn test_e2e_health_check() {
    let base_url = get_base_url();
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/health", base_url))
        .send()
        .await
        .expect("Health check failed");

    assert!(
        response.status().is_success(),
        "Health check returned non-success status: {}",
        response.status()
    );
}

#[tokio::test]
#[ignore] // Requires running API server, worker and media host
async fn test_e2e_single_image_post() {
    let base_url = get_base_url();
    let client = reqwest::Client::new();

    let upload = upload_post(
        &client,
        &base_url,
        "e2e single image",
        vec![("photo.jpg", sample_image(ImageFormat::Jpeg))],
    )
    .await
    .expect("Failed to upload post");
    assert_eq!(upload.status, "pending");
    assert_eq!(upload.file_paths.len(), 1);
    println!("  ✓ Upload accepted, post_id: {}", upload.post_id);

    let status = wait_for_job(&client, &base_url, upload.post_id)
        .await
        .expect("Failed to wait for post");

    assert_eq!(status.job_id, upload.post_id);
    assert_eq!(status.status, "completed", "error: {:?}", status.error);
    assert_eq!(status.image_urls.len(), 1);
    println!("  ✓ Completed: {}", status.image_urls[0]);
}

#[tokio::test]
#[ignore] // Requires running API server, worker and media host
async fn test_e2e_mixed_format_post() {
    let base_url = get_base_url();
    let client = reqwest::Client::new();

    let upload = upload_post(
        &client,
        &base_url,
        "e2e mixed formats",
        vec![
            ("one.jpg", sample_image(ImageFormat::Jpeg)),
            ("two.bmp", b"BM raw bitmap bytes".to_vec()),
            ("three.png", sample_image(ImageFormat::Png)),
        ],
    )
    .await
    .expect("Failed to upload post");

    let status = wait_for_job(&client, &base_url, upload.post_id)
        .await
        .expect("Failed to wait for post");

    // the bitmap goes up as-is; the host may refuse it
    assert_eq!(status.status, "completed", "error: {:?}", status.error);
    assert!(
        (2..=3).contains(&status.image_urls.len()),
        "unexpected URL count: {}",
        status.image_urls.len()
    );
}

#[tokio::test]
#[ignore] // Requires running API server, worker and media host
async fn test_e2e_binary_upload() {
    let base_url = get_base_url();
    let client = reqwest::Client::new();

    let upload = upload_binary(&client, &base_url, "image/png", sample_image(ImageFormat::Png))
        .await
        .expect("Failed to upload binary");
    assert_eq!(upload.status, "pending");

    let status = wait_for_job(&client, &base_url, upload.job_id)
        .await
        .expect("Failed to wait for binary job");

    match status.status.as_str() {
        "completed" => assert_eq!(status.image_urls.len(), 1),
        _ => panic!("Binary upload failed: {:?}", status.error),
    }
}

#[tokio::test]
#[ignore] // Requires running API server
async fn test_e2e_post_without_images_is_rejected() {
    let base_url = get_base_url();
    let client = reqwest::Client::new();

    let result = upload_post(&client, &base_url, "no images", vec![]).await;

    let err = result.expect_err("post without images must be rejected");
    assert!(err.to_string().contains("400"), "unexpected error: {}", err);
}
