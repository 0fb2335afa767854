pub mod archive;
pub mod classifier;
pub mod converters;
pub mod dedup;
pub mod embedding;
pub mod errors;
pub mod experience;
pub mod field_extractor;
pub mod file_storage;
pub mod job_store;
pub mod materializer;
pub mod models;
pub mod ocr;
pub mod resume_store;
pub mod service;
pub mod settings_store;
pub mod size_manager;
pub mod structuring;
