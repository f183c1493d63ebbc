pub mod balancer;
pub mod dispatch;
pub mod queue;

pub use balancer::{select_worker, Strategy};
pub use dispatch::{RunJobRequest, Scheduler, MAX_DISPATCH_RETRIES};
pub use queue::PriorityQueue;
