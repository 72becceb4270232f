//! Integration tests for the scheduling and aggregation engine

#[path = "integration/helpers.rs"]
mod helpers;

#[path = "integration/probe_http.rs"]
mod probe_http;

#[path = "integration/batch_pipeline.rs"]
mod batch_pipeline;

#[path = "integration/lifecycle.rs"]
mod lifecycle;

#[cfg(feature = "storage-sqlite")]
#[path = "integration/storage_persistence.rs"]
mod storage_persistence;
