pub mod task;
pub mod worker_pool;

pub use task::ResizeTask;
pub use worker_pool::WorkerPool;
