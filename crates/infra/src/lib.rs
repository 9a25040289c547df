//! Infrastructure layer: durable job storage.

pub mod job_store;

pub use job_store::PostgresJobStore;
