//! Per-request state machine: hydrate, dispatch each group in order, collect
//! completions, persist lifecycle state, and assemble the final response.

use std::rc::Rc;
use std::sync::Arc;

use chrono::Utc;
use sxd_document::dom::Element;
use tracing::info;
use tracing::warn;

use crate::collector::CompletionCollector;
use crate::constants;
use crate::constants::DEFAULT_BLOCK_MS;
use crate::constants::REQUEST_LIFECYCLE_STREAM;
use crate::constants::TASK_UPDATES_STREAM;
use crate::constants::TASK_WAIT_TIMEOUT_MS;
use crate::dispatch::TaskDispatcher;
use crate::error::OrchestrationError;
use crate::event::LifecycleStatus;
use crate::event::RequestEvent;
use crate::hydration::HydrationEngine;
use crate::hydration::fetchers::CompositeResourceFetcher;
use crate::hydration::fetchers::FileResourceFetcher;
use crate::hydration::fetchers::ResourceFetcher;
use crate::invoker::TaskInvoker;
use crate::store::Store;
use crate::xml::XmlDocument;
use crate::xml::element_children;
use crate::xml::find_child;
use crate::xml::local_name;
use crate::xml::to_pretty_xml;

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub response_key: String,
    pub group_count: usize,
}

/// Writes request-level state, lifecycle events, and failure blobs.
pub(crate) struct RequestStateWriter<'a> {
    store: &'a dyn Store,
}

impl<'a> RequestStateWriter<'a> {
    pub(crate) fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }

    pub(crate) async fn mark(
        &self,
        request_id: &str,
        fields: &[(&str, String)],
    ) -> Result<(), OrchestrationError> {
        let fields: Vec<(String, String)> = fields
            .iter()
            .map(|(field, value)| (field.to_string(), value.clone()))
            .collect();
        self.store
            .hset(&constants::request_state_key(request_id), &fields)
            .await?;
        Ok(())
    }

    pub(crate) async fn publish(
        &self,
        request_id: &str,
        status: LifecycleStatus,
        extra: &[(&str, serde_json::Value)],
    ) -> Result<(), OrchestrationError> {
        let mut fields = vec![
            ("requestId".to_string(), request_id.to_string()),
            ("status".to_string(), status.as_str().to_string()),
            ("timestamp".to_string(), epoch_seconds()),
        ];
        for (field, value) in extra {
            let encoded = match value {
                serde_json::Value::String(text) => text.clone(),
                serde_json::Value::Object(_) | serde_json::Value::Array(_) => value.to_string(),
                other => other.to_string(),
            };
            fields.push((field.to_string(), encoded));
        }
        self.store
            .xadd(REQUEST_LIFECYCLE_STREAM, &fields)
            .await?;
        Ok(())
    }

    /// Persist the failure blob and mark the request failed. Storage faults
    /// here must not mask the failure being recorded.
    pub(crate) async fn record_failure(&self, request_id: &str, detail: &serde_json::Value) {
        let encoded = detail.to_string();
        if let Err(error) = self
            .store
            .set(&constants::failure_key(request_id), &encoded)
            .await
        {
            warn!(request_id = %request_id, error = %error, "unable to persist failure detail");
        }
        if let Err(error) = self
            .mark(
                request_id,
                &[
                    ("status", "failed".to_string()),
                    ("failureAt", now_iso()),
                ],
            )
            .await
        {
            warn!(request_id = %request_id, error = %error, "unable to mark request failed");
        }
        // The failure detail travels JSON-encoded as a string value;
        // downstream dashboards rely on that shape.
        if let Err(error) = self
            .publish(
                request_id,
                LifecycleStatus::Failed,
                &[("detail", serde_json::Value::String(encoded))],
            )
            .await
        {
            warn!(request_id = %request_id, error = %error, "unable to publish failure event");
        }
    }
}

fn now_iso() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn epoch_seconds() -> String {
    format!("{:.3}", Utc::now().timestamp_millis() as f64 / 1000.0)
}

pub struct RequestOrchestrator {
    store: Arc<dyn Store>,
    invoker: Arc<dyn TaskInvoker>,
    fetcher: Rc<dyn ResourceFetcher>,
    block_ms: u64,
    wait_timeout_ms: u64,
}

impl RequestOrchestrator {
    pub fn new(store: Arc<dyn Store>, invoker: Arc<dyn TaskInvoker>) -> Self {
        Self {
            store,
            invoker,
            fetcher: Rc::new(CompositeResourceFetcher::new(vec![Box::new(
                FileResourceFetcher,
            )])),
            block_ms: DEFAULT_BLOCK_MS,
            wait_timeout_ms: TASK_WAIT_TIMEOUT_MS,
        }
    }

    /// Replace the resource fetcher used by href hydration.
    pub fn with_fetcher(mut self, fetcher: Rc<dyn ResourceFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Tune the per-poll block and the per-group deadline.
    pub fn with_timeouts(mut self, block_ms: u64, wait_timeout_ms: u64) -> Self {
        self.block_ms = block_ms;
        self.wait_timeout_ms = wait_timeout_ms;
        self
    }

    /// Execute one request to completion. Any failure past the `started`
    /// transition records a failure blob, marks the request failed, publishes
    /// a `failed` lifecycle event, and propagates.
    pub async fn run(&self, event: &RequestEvent) -> Result<RunOutcome, OrchestrationError> {
        let request_id = event.request_id.as_str();
        let response_key = event.response_key();
        if let Some(metadata_key) = &event.metadata_key {
            info!(request_id = %request_id, metadata_key = %metadata_key, "request carries metadata");
        }

        let raw_xml = self.store.get(&event.xml_key).await?.ok_or_else(|| {
            OrchestrationError::validation(format!(
                "Request XML not found for key {}",
                event.xml_key
            ))
        })?;
        let document = XmlDocument::parse(&raw_xml)
            .map_err(|_| OrchestrationError::validation("Input XML is not well-formed."))?;
        let engine = HydrationEngine::with_default_pipeline(&document, self.fetcher.clone());

        let source_root = document
            .root_element()
            .ok_or_else(|| OrchestrationError::validation("Input XML has no document element."))?;
        let root = match engine.hydrate(source_root, source_root, None).await?.into_iter().next() {
            Some(item) => {
                // Later hydration passes resolve absolute XPaths through the
                // document root, so the hydrated tree takes the original's
                // place.
                crate::xml::install_root(document.dom(), item.element);
                item.element
            }
            None => source_root,
        };

        let project = find_child(root, "project").ok_or_else(|| {
            OrchestrationError::validation("Request XML has no project element.")
        })?;
        let groups: Vec<Element<'_>> = element_children(project)
            .into_iter()
            .filter(|child| local_name(*child) == "group")
            .collect();
        let group_count = groups.len();
        info!(request_id = %request_id, groups = group_count, "processing request");

        let state = RequestStateWriter::new(self.store.as_ref());
        self.store
            .ensure_group(
                TASK_UPDATES_STREAM,
                &constants::consumer_group_name(request_id),
                "$",
            )
            .await?;
        state
            .mark(
                request_id,
                &[
                    ("status", "started".to_string()),
                    ("groupCount", group_count.to_string()),
                ],
            )
            .await?;
        state
            .publish(
                request_id,
                LifecycleStatus::Started,
                &[("groupCount", serde_json::json!(group_count))],
            )
            .await?;

        match self
            .execute(&document, &engine, root, &groups, request_id, &response_key)
            .await
        {
            Ok(()) => Ok(RunOutcome {
                response_key,
                group_count,
            }),
            Err(error) => {
                state
                    .record_failure(
                        request_id,
                        &serde_json::json!({
                            "error": error.to_string(),
                            "stage": "group_processing",
                        }),
                    )
                    .await;
                Err(error)
            }
        }
    }

    /// Everything between `started` and `completed`; the caller records the
    /// failure on any error.
    async fn execute<'d>(
        &self,
        document: &'d XmlDocument,
        engine: &HydrationEngine<'d>,
        root: Element<'d>,
        groups: &[Element<'d>],
        request_id: &str,
        response_key: &str,
    ) -> Result<(), OrchestrationError> {
        let state = RequestStateWriter::new(self.store.as_ref());
        let dispatcher = TaskDispatcher::new(self.store.as_ref(), self.invoker.as_ref());
        let collector = CompletionCollector::new(
            self.store.as_ref(),
            self.invoker.as_ref(),
            self.block_ms,
            self.wait_timeout_ms,
        );

        for (index, group) in groups.iter().enumerate() {
            state
                .mark(
                    request_id,
                    &[
                        ("currentGroup", index.to_string()),
                        ("status", "running".to_string()),
                    ],
                )
                .await?;
            state
                .publish(
                    request_id,
                    LifecycleStatus::GroupStarted,
                    &[("group", serde_json::json!(index))],
                )
                .await?;

            let descriptors = dispatcher
                .dispatch_group(engine, root, *group, request_id, index)
                .await?;
            collector
                .await_group(document, *group, request_id, index, descriptors)
                .await?;

            state
                .publish(
                    request_id,
                    LifecycleStatus::GroupCompleted,
                    &[("group", serde_json::json!(index))],
                )
                .await?;
        }

        let response_xml = to_pretty_xml(root);
        self.store.set(response_key, &response_xml).await?;
        state
            .mark(
                request_id,
                &[
                    ("status", "succeeded".to_string()),
                    ("response_key", response_key.to_string()),
                    ("completedAt", now_iso()),
                ],
            )
            .await?;
        state
            .publish(
                request_id,
                LifecycleStatus::Completed,
                &[("responseKey", serde_json::Value::String(response_key.to_string()))],
            )
            .await?;
        info!(request_id = %request_id, response_key = %response_key, "request succeeded");
        Ok(())
    }
}
