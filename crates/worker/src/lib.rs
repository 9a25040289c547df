//! Building blocks of the `livequeue-worker` binary.

pub mod handlers;
pub mod settings;

pub use settings::WorkerSettings;
