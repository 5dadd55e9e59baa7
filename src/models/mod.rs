pub mod envelope;
pub mod job;
pub mod upload;
