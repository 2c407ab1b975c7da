pub mod assertions;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod errors;
pub mod fingerprint;
pub mod mapping;
pub mod model;
pub mod progress;
pub mod summary;
pub mod template;

pub mod report;
pub mod storage;
