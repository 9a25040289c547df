//! Durable [`JobStore`](livequeue_engine::JobStore) backends.

mod postgres;
mod rows;

pub use postgres::PostgresJobStore;
