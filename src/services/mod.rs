pub mod blob;
pub mod consumer;
pub mod producer;
pub mod queue;
pub mod status;
pub mod storage;
pub mod transcoder;
pub mod uploader;
