pub mod config;
pub mod engine;
pub mod errors;
pub mod fingerprint;
pub mod judge;
pub mod metrics_api;
pub mod model;
pub mod notify;
pub mod providers;
pub mod remote;
pub mod report;
pub mod storage;
