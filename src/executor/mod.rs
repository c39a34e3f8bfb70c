pub mod manager;
pub mod retry;
pub mod scheduler;
pub mod task;
