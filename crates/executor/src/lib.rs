//! Pull executor (Component G): the worker-pool task scheduler that
//! drives a forest of per-table pull tasks, expanding each exactly once
//! before execution and fanning parent rows out into child tasks. See
//! spec §4.5/§4.6.

mod item_bag;
mod pool;
mod queue;
mod result_handler;
mod task;

pub use item_bag::TaskItemBag;
pub use pool::PullExecutor;
pub use queue::TaskQueue;
pub use result_handler::ResultHandler;
pub use task::{DataSourcePullTask, TaskDoneCallback, TaskId};
