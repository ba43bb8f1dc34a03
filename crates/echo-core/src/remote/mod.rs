//! Client side of the remote test-suite backend.

pub mod api;
pub mod http;
pub mod reconciler;

pub use api::{SuiteBackend, SuiteStatus};
pub use http::HttpBackend;
pub use reconciler::{ReconcileHandle, Reconciler, ReconcilerConfig, RemoteView};
