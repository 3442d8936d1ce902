//! Drains the shared updates stream until every task of the current group
//! has settled, driving retries and failure aggregation.

use std::collections::HashMap;
use std::time::Duration;
use std::time::Instant;

use sxd_document::dom::Element;
use tracing::debug;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use crate::constants;
use crate::constants::MAX_TASK_RETRIES;
use crate::constants::TASK_UPDATES_STREAM;
use crate::error::OrchestrationError;
use crate::event::TaskDescriptor;
use crate::event::TaskUpdate;
use crate::event::UpdateStatus;
use crate::invoker::TaskInvoker;
use crate::orchestrator::RequestStateWriter;
use crate::store::Store;
use crate::xml::XmlDocument;
use crate::xml::copy_subtree;
use crate::xml::element_children;
use crate::xml::find_child;
use crate::xml::local_name;

pub struct CompletionCollector<'a> {
    store: &'a dyn Store,
    invoker: &'a dyn TaskInvoker,
    block_ms: u64,
    wait_timeout_ms: u64,
}

impl<'a> CompletionCollector<'a> {
    pub fn new(
        store: &'a dyn Store,
        invoker: &'a dyn TaskInvoker,
        block_ms: u64,
        wait_timeout_ms: u64,
    ) -> Self {
        Self {
            store,
            invoker,
            block_ms,
            wait_timeout_ms,
        }
    }

    /// Consume updates for `(request_id, group_index)` until all dispatched
    /// tasks settle, splicing each result's valuation into `group` in
    /// delivery order.
    pub async fn await_group<'d>(
        &self,
        document: &'d XmlDocument,
        group: Element<'d>,
        request_id: &str,
        group_index: usize,
        descriptors: Vec<TaskDescriptor>,
    ) -> Result<(), OrchestrationError> {
        let expected = descriptors.len();
        let consumer_group = constants::consumer_group_name(request_id);
        let consumer = format!("orchestrator-{}", Uuid::new_v4().simple());
        let deadline = Instant::now() + Duration::from_millis(self.wait_timeout_ms);
        let group_key = constants::group_state_key(request_id, group_index);

        let descriptor_by_task: HashMap<&str, &TaskDescriptor> = descriptors
            .iter()
            .map(|descriptor| (descriptor.task_id.as_str(), descriptor))
            .collect();

        // Valuations are re-added as their results come in.
        for child in element_children(group) {
            if local_name(child) == "valuation" {
                child.remove_from_parent();
            }
        }

        let mut completed = 0usize;
        let mut pending_failures: Vec<TaskUpdate> = Vec::new();

        while completed < expected {
            if Instant::now() > deadline {
                return Err(OrchestrationError::Timeout { group_index });
            }

            let entries = self
                .store
                .read_group(
                    TASK_UPDATES_STREAM,
                    &consumer_group,
                    &consumer,
                    expected,
                    self.block_ms,
                )
                .await?;
            if entries.is_empty() {
                continue;
            }

            for entry in entries {
                let update = TaskUpdate::from_fields(&entry.fields);

                if update.request_id != request_id {
                    // Someone else's event on the shared stream.
                    self.ack(&consumer_group, &entry.id).await?;
                    continue;
                }
                if update.group_idx != group_index as i64 {
                    // Another group's event; leave pending for the owning
                    // orchestrator instance.
                    continue;
                }
                let Some(descriptor) = descriptor_by_task.get(update.task_id.as_str()) else {
                    self.ack(&consumer_group, &entry.id).await?;
                    continue;
                };

                match update.status {
                    UpdateStatus::Completed => {
                        self.splice_result(document, group, &update).await?;
                        completed += 1;
                        self.store
                            .hset(&group_key, &[("completed".into(), completed.to_string())])
                            .await?;
                        debug!(
                            request_id = %request_id,
                            group = group_index,
                            task_id = %update.task_id,
                            completed,
                            expected,
                            "task completed"
                        );
                    }
                    UpdateStatus::Failed => {
                        if update.attempt < MAX_TASK_RETRIES {
                            let retry = descriptor.dispatch(update.attempt + 1);
                            warn!(
                                request_id = %request_id,
                                group = group_index,
                                task_id = %update.task_id,
                                attempt = retry.attempt,
                                "retrying failed task"
                            );
                            self.invoker.invoke(&retry).await?;
                        } else {
                            pending_failures.push(update);
                            self.store
                                .hset(
                                    &group_key,
                                    &[("failed".into(), pending_failures.len().to_string())],
                                )
                                .await?;
                        }
                    }
                    UpdateStatus::Other(_) => {}
                }
                self.ack(&consumer_group, &entry.id).await?;
            }

            if !pending_failures.is_empty() {
                let detail = serde_json::json!({
                    "group": group_index,
                    "failures": pending_failures,
                });
                RequestStateWriter::new(self.store)
                    .record_failure(request_id, &detail)
                    .await;
                return Err(OrchestrationError::TaskFailure {
                    group_index,
                    detail: detail.to_string(),
                });
            }
        }

        self.store
            .hset(&group_key, &[("status".into(), "completed".into())])
            .await?;
        info!(request_id = %request_id, group = group_index, completed, "group completed");
        Ok(())
    }

    async fn ack(&self, consumer_group: &str, id: &str) -> Result<(), OrchestrationError> {
        self.store
            .ack(TASK_UPDATES_STREAM, consumer_group, id)
            .await?;
        Ok(())
    }

    /// Read the task's result XML and append its valuation node to the
    /// in-memory group.
    async fn splice_result<'d>(
        &self,
        document: &'d XmlDocument,
        group: Element<'d>,
        update: &TaskUpdate,
    ) -> Result<(), OrchestrationError> {
        let result_key =
            update
                .result_key
                .as_deref()
                .ok_or_else(|| OrchestrationError::InvalidTaskResult {
                    key: String::new(),
                    message: "completed update carried no resultKey".to_string(),
                })?;
        let payload = self.store.get(result_key).await?.ok_or_else(|| {
            OrchestrationError::InvalidTaskResult {
                key: result_key.to_string(),
                message: "result payload is missing".to_string(),
            }
        })?;
        let result_document =
            XmlDocument::parse(&payload).map_err(|error| OrchestrationError::InvalidTaskResult {
                key: result_key.to_string(),
                message: error.to_string(),
            })?;
        let valuation = result_document
            .root_element()
            .and_then(|root| find_child(root, "project"))
            .and_then(|project| find_child(project, "group"))
            .and_then(|group| find_child(group, "valuation"))
            .ok_or_else(|| OrchestrationError::InvalidTaskResult {
                key: result_key.to_string(),
                message: "result XML has no project/group/valuation node".to_string(),
            })?;
        group.append_child(copy_subtree(document.dom(), valuation));
        Ok(())
    }
}
