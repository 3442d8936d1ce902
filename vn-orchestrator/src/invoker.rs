//! Hands dispatch payloads to the external worker fleet.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
#[cfg(feature = "lambda")]
use tracing::error;

use crate::constants::TASK_DISPATCH_STREAM;
use crate::error::InvokerError;
use crate::event::TaskDispatch;
use crate::store::Store;

/// Asynchronous fan-out seam. Implementations must eventually cause a
/// `completed` or `failed` event for the task to appear on the updates
/// stream; they never wait for the evaluation itself.
#[async_trait]
pub trait TaskInvoker: Send + Sync {
    async fn invoke(&self, dispatch: &TaskDispatch) -> Result<(), InvokerError>;
}

/// Publishes dispatch payloads onto the dispatch stream consumed by the
/// worker pool.
pub struct StreamTaskInvoker {
    store: Arc<dyn Store>,
}

impl StreamTaskInvoker {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TaskInvoker for StreamTaskInvoker {
    async fn invoke(&self, dispatch: &TaskDispatch) -> Result<(), InvokerError> {
        let id = self
            .store
            .xadd(TASK_DISPATCH_STREAM, &dispatch.to_fields())
            .await?;
        debug!(
            request_id = %dispatch.request_id,
            task_id = %dispatch.task_id,
            entry = %id,
            "queued task dispatch"
        );
        Ok(())
    }
}

/// Invokes a function-as-a-service worker asynchronously (`Event` invocation
/// type); the worker publishes its own update when done.
#[cfg(feature = "lambda")]
pub struct LambdaTaskInvoker {
    client: aws_sdk_lambda::Client,
    function_name: String,
}

#[cfg(feature = "lambda")]
impl LambdaTaskInvoker {
    pub fn new(client: aws_sdk_lambda::Client, function_name: impl Into<String>) -> Self {
        Self {
            client,
            function_name: function_name.into(),
        }
    }

    pub async fn from_env(function_name: impl Into<String>) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(aws_sdk_lambda::Client::new(&config), function_name)
    }
}

#[cfg(feature = "lambda")]
#[async_trait]
impl TaskInvoker for LambdaTaskInvoker {
    async fn invoke(&self, dispatch: &TaskDispatch) -> Result<(), InvokerError> {
        let payload: serde_json::Map<String, serde_json::Value> = dispatch
            .to_fields()
            .into_iter()
            .map(|(field, value)| (field, serde_json::Value::String(value)))
            .collect();
        let bytes = serde_json::to_vec(&payload).map_err(|error| InvokerError::Failed {
            message: error.to_string(),
        })?;

        let response = self
            .client
            .invoke()
            .function_name(&self.function_name)
            .invocation_type(aws_sdk_lambda::types::InvocationType::Event)
            .payload(aws_sdk_lambda::primitives::Blob::new(bytes))
            .send()
            .await
            .map_err(|err| {
                error!(
                    function = %self.function_name,
                    task_id = %dispatch.task_id,
                    error = %err,
                    "task invocation failed"
                );
                InvokerError::Failed {
                    message: err.to_string(),
                }
            })?;

        let status = response.status_code();
        if status >= 300 {
            return Err(InvokerError::Failed {
                message: format!("function invocation returned status {status}"),
            });
        }
        Ok(())
    }
}
