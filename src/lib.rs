//! Asynchronous image upload pipeline.
//!
//! The API server stages submitted images, records a `pending` status and
//! publishes a job envelope to a durable queue. Workers consume the queue,
//! compress each image, publish it to a media host and record the resulting
//! URLs, with at-least-once delivery and requeue on failure.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
