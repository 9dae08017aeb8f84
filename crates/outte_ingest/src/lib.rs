pub mod fetch;
pub mod pipeline;
pub mod retry;
pub mod worker;

pub use fetch::{BoardSource, DojoClient, FetchContext, Fetched};
pub use pipeline::{BoardSweep, DemoOutcome, DemoSweep, Ingestor, UpdateOutcome};
pub use retry::{RetryOutcome, RetryPolicy};
pub use worker::{WorkerHealth, WorkerSet, WorkerStatus};
