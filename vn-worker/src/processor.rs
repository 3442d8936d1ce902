//! Handles one dispatch entry end to end: payload in, result out, update
//! published. Failures publish a `failed` update and record a failure blob
//! before propagating.

use std::sync::Arc;

use tracing::debug;
use tracing::error;
use tracing::warn;

use vn_orchestrator::constants;
use vn_orchestrator::constants::TASK_UPDATES_STREAM;
use vn_orchestrator::event::TaskUpdate;
use vn_orchestrator::event::UpdateStatus;
use vn_orchestrator::store::Store;
use vn_orchestrator::store::StoreError;
use vn_orchestrator::store::StreamEntry;
use vn_orchestrator::xml::XmlDocument;
use vn_orchestrator::xml::descendants;
use vn_orchestrator::xml::find_child;
use vn_orchestrator::xml::local_name;
use vn_orchestrator::xml::set_leading_text;
use vn_orchestrator::xml::to_xml_string;

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("malformed dispatch entry: missing {field}")]
    MalformedEntry { field: &'static str },

    #[error("missing task payload {key}")]
    MissingPayload { key: String },

    #[error("evaluation failed: {message}")]
    Evaluation { message: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The dispatch fields a worker needs to process one task.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub request_id: String,
    pub group_index: i64,
    pub group_name: String,
    pub task_id: String,
    pub valuation_name: String,
    pub payload_key: String,
    pub result_key: String,
    pub attempt: u32,
}

impl TaskContext {
    pub fn from_fields(fields: &[(String, String)]) -> Result<Self, WorkerError> {
        let get = |name: &'static str| {
            fields
                .iter()
                .find(|(field, _)| field == name)
                .map(|(_, value)| value.clone())
        };
        let require = |name: &'static str| {
            get(name).ok_or(WorkerError::MalformedEntry { field: name })
        };

        let group_index: i64 = require("groupIdx")?
            .parse()
            .map_err(|_| WorkerError::MalformedEntry { field: "groupIdx" })?;
        let task_id = require("taskId")?;
        Ok(Self {
            request_id: require("requestId")?,
            group_index,
            group_name: get("groupName").unwrap_or_else(|| format!("group-{group_index}")),
            valuation_name: get("valuationName").unwrap_or_else(|| task_id.clone()),
            task_id,
            payload_key: require("payloadKey")?,
            result_key: require("resultKey")?,
            attempt: get("attempt")
                .and_then(|value| value.parse().ok())
                .unwrap_or(1),
        })
    }
}

/// Evaluation seam; injected in tests.
pub trait ValuationEvaluator: Send + Sync {
    /// Evaluate the task payload XML and return the result XML.
    fn evaluate(&self, payload_xml: &str) -> Result<String, WorkerError>;
}

/// Reference evaluator: prices the valuation by filling the first
/// `analytics/price/amount` descendant.
pub struct PriceEvaluator;

impl ValuationEvaluator for PriceEvaluator {
    fn evaluate(&self, payload_xml: &str) -> Result<String, WorkerError> {
        let document = XmlDocument::parse(payload_xml).map_err(|error| WorkerError::Evaluation {
            message: error.to_string(),
        })?;
        let root = document.root_element().ok_or_else(|| WorkerError::Evaluation {
            message: "payload has no document element".to_string(),
        })?;

        let amount = descendants(root)
            .into_iter()
            .filter(|node| local_name(*node) == "analytics")
            .find_map(|analytics| {
                find_child(analytics, "price").and_then(|price| find_child(price, "amount"))
            });
        if let Some(amount) = amount {
            set_leading_text(document.dom(), amount, "100.00");
        }
        Ok(to_xml_string(root))
    }
}

pub struct TaskProcessor {
    store: Arc<dyn Store>,
    evaluator: Box<dyn ValuationEvaluator>,
}

impl TaskProcessor {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_evaluator(store, Box::new(PriceEvaluator))
    }

    pub fn with_evaluator(store: Arc<dyn Store>, evaluator: Box<dyn ValuationEvaluator>) -> Self {
        Self { store, evaluator }
    }

    /// Process one dispatch entry. On failure, a `failed` update is published
    /// and the failure blob recorded before the error propagates; the caller
    /// still acknowledges the entry either way.
    pub async fn handle_dispatch(&self, entry: &StreamEntry) -> Result<(), WorkerError> {
        let context = TaskContext::from_fields(&entry.fields)?;
        match self.execute(&context).await {
            Ok(()) => {
                debug!(task_id = %context.task_id, "task processed");
                Ok(())
            }
            Err(err) => {
                error!(task_id = %context.task_id, error = %err, "task processing failed");
                self.publish_update(&context, UpdateStatus::Failed, Some(err.to_string()))
                    .await?;
                self.record_failure(&context, &err).await;
                Err(err)
            }
        }
    }

    async fn execute(&self, context: &TaskContext) -> Result<(), WorkerError> {
        let payload = self
            .store
            .get(&context.payload_key)
            .await?
            .ok_or_else(|| WorkerError::MissingPayload {
                key: context.payload_key.clone(),
            })?;
        let result = self.evaluator.evaluate(&payload)?;
        self.store.set(&context.result_key, &result).await?;
        self.publish_update(context, UpdateStatus::Completed, None)
            .await
    }

    async fn publish_update(
        &self,
        context: &TaskContext,
        status: UpdateStatus,
        detail: Option<String>,
    ) -> Result<(), WorkerError> {
        let update = TaskUpdate {
            request_id: context.request_id.clone(),
            group_idx: context.group_index,
            group_name: Some(context.group_name.clone()),
            task_id: context.task_id.clone(),
            valuation_name: Some(context.valuation_name.clone()),
            result_key: Some(context.result_key.clone()),
            status,
            attempt: context.attempt,
            result: Some(detail.unwrap_or_default()),
        };
        self.store
            .xadd(TASK_UPDATES_STREAM, &update.to_fields())
            .await?;
        Ok(())
    }

    async fn record_failure(&self, context: &TaskContext, err: &WorkerError) {
        let detail = serde_json::json!({
            "taskId": context.task_id,
            "groupIdx": context.group_index,
            "attempt": context.attempt,
            "error": err.to_string(),
        });
        if let Err(store_error) = self
            .store
            .set(&constants::failure_key(&context.request_id), &detail.to_string())
            .await
        {
            warn!(task_id = %context.task_id, error = %store_error, "unable to persist failure detail");
        }
    }
}

#[cfg(test)]
mod tests {
    use vn_orchestrator::store::MemoryStore;

    use super::*;

    const PAYLOAD: &str = "<req><project><group name='g1'><valuation name='security'>\
                           <analytics><price><amount/></price></analytics>\
                           </valuation></group></project></req>";

    fn dispatch_entry(payload_key: &str, result_key: &str) -> StreamEntry {
        StreamEntry {
            id: "1-0".into(),
            fields: vec![
                ("requestId".into(), "req-1".into()),
                ("groupIdx".into(), "0".into()),
                ("groupName".into(), "g1".into()),
                ("taskId".into(), "1".into()),
                ("payloadKey".into(), payload_key.into()),
                ("resultKey".into(), result_key.into()),
                ("attempt".into(), "2".into()),
            ],
        }
    }

    #[tokio::test]
    async fn dispatch_writes_result_and_publishes_completed() {
        let store = Arc::new(MemoryStore::new());
        store.set("p", PAYLOAD).await.unwrap();
        let processor = TaskProcessor::new(store.clone());

        processor
            .handle_dispatch(&dispatch_entry("p", "r"))
            .await
            .unwrap();

        let result = store.get("r").await.unwrap().unwrap();
        assert!(result.contains("<amount>100.00</amount>"));

        let updates = store.entries(TASK_UPDATES_STREAM);
        assert_eq!(updates.len(), 1);
        let update = TaskUpdate::from_fields(&updates[0].fields);
        assert_eq!(update.status, UpdateStatus::Completed);
        assert_eq!(update.attempt, 2);
        assert_eq!(update.result_key.as_deref(), Some("r"));
    }

    #[tokio::test]
    async fn missing_payload_publishes_failed_and_records_failure() {
        let store = Arc::new(MemoryStore::new());
        let processor = TaskProcessor::new(store.clone());

        let error = processor
            .handle_dispatch(&dispatch_entry("absent", "r"))
            .await
            .unwrap_err();
        assert!(matches!(error, WorkerError::MissingPayload { .. }));

        let updates = store.entries(TASK_UPDATES_STREAM);
        assert_eq!(updates.len(), 1);
        let update = TaskUpdate::from_fields(&updates[0].fields);
        assert_eq!(update.status, UpdateStatus::Failed);

        let blob = store
            .get(&constants::failure_key("req-1"))
            .await
            .unwrap()
            .unwrap();
        assert!(blob.contains("absent"));
    }

    #[tokio::test]
    async fn malformed_entry_is_rejected_without_updates() {
        let store = Arc::new(MemoryStore::new());
        let processor = TaskProcessor::new(store.clone());

        let entry = StreamEntry {
            id: "1-0".into(),
            fields: vec![("requestId".into(), "req-1".into())],
        };
        let error = processor.handle_dispatch(&entry).await.unwrap_err();
        assert!(matches!(error, WorkerError::MalformedEntry { .. }));
        assert!(store.entries(TASK_UPDATES_STREAM).is_empty());
    }
}
