//! Background workers.

pub mod refresh_worker;

pub use refresh_worker::{RefreshWorker, WorkerHandle};
