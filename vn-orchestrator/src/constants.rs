//! Stream names, key templates, and tunables shared across the services.

/// Per-task `completed`/`failed` events published by workers. Shared across
/// all requests; isolation is via one consumer group per request.
pub const TASK_UPDATES_STREAM: &str = "task:updates";

/// Per-request state-transition events.
pub const REQUEST_LIFECYCLE_STREAM: &str = "request:lifecycle";

/// Dispatch payloads consumed by the task workers.
pub const TASK_DISPATCH_STREAM: &str = "task:dispatch";

/// Consumer group used by workers on the dispatch stream.
pub const TASK_WORKERS_GROUP: &str = "task-workers";

/// Maximum time an `XREADGROUP` poll may block.
pub const DEFAULT_BLOCK_MS: u64 = 5_000;

/// Total deadline for one group's tasks to settle.
pub const TASK_WAIT_TIMEOUT_MS: u64 = 300_000;

/// A task that publishes `failed` with `attempt < MAX_TASK_RETRIES` is
/// re-invoked; at the limit it counts as a fatal failure.
pub const MAX_TASK_RETRIES: u32 = 3;

pub fn consumer_group_name(request_id: &str) -> String {
    format!("req::{request_id}")
}

pub fn request_state_key(request_id: &str) -> String {
    format!("request:{request_id}")
}

pub fn group_state_key(request_id: &str, group_index: usize) -> String {
    format!("request:{request_id}:group:{group_index}")
}

pub fn task_payload_key(request_id: &str, group_index: usize, task_id: &str) -> String {
    format!("task:{request_id}:{group_index}:{task_id}:payload")
}

pub fn task_result_key(request_id: &str, group_index: usize, task_id: &str) -> String {
    format!("task:{request_id}:{group_index}:{task_id}:result")
}

pub fn response_key(request_id: &str) -> String {
    format!("cache:request:{request_id}:response")
}

pub fn failure_key(request_id: &str) -> String {
    format!("cache:request:{request_id}:failure")
}
