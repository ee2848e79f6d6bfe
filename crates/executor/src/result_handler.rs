use async_trait::async_trait;
use diagnostics::Diagnostics;
use row::Rows;
use schema::ClientHandle;
use serde_json::Value as Raw;

use crate::task::DataSourcePullTask;

/// Converts one raw result pushed by a data source into inserted rows
/// plus the raw-result elements that matched them, one-to-one and
/// positionally (Component H; consumed by the consumer side of task
/// execution). Provider runtimes supply the concrete implementation —
/// this crate only needs the contract to drive child-task fan-out. Async
/// because a real implementation runs the transformer and then awaits a
/// storage insert per spec §4.7.
#[async_trait]
pub trait ResultHandler: Send + Sync {
    async fn handle(&self, client: &ClientHandle, task: &DataSourcePullTask, raw_result: &Raw) -> (Rows, Vec<Raw>, Diagnostics);
}
