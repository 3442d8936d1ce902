//! Error types for the orchestrator core.
//!
//! Strategies and the hydration engine never catch; failures propagate up to
//! the orchestrator's outer scope, which records a failure blob and re-raises.

use crate::store::StoreError;

/// A resource named by an `href` URI could not be retrieved.
#[derive(Debug, thiserror::Error)]
pub enum ResourceFetchError {
    #[error("invalid resource URI '{uri}'")]
    InvalidUri { uri: String },

    #[error("no fetcher available to handle URI '{uri}'")]
    UnsupportedScheme { uri: String },

    #[error("resource not found for URI '{uri}'")]
    NotFound { uri: String },

    #[error("failed to fetch '{uri}': {message}")]
    Backend { uri: String, message: String },
}

/// Raised when reference hydration fails. Hydration errors are never retried.
#[derive(Debug, thiserror::Error)]
pub enum HydrationError {
    #[error(transparent)]
    Fetch(#[from] ResourceFetchError),

    #[error("element <{tag}> has an empty href attribute and cannot be hydrated")]
    EmptyHref { tag: String },

    #[error("unable to parse XML from '{uri}'")]
    RemoteParse { uri: String },

    #[error("remote document at '{uri}' does not contain a single match for XPath '{path}'")]
    AmbiguousRemoteMatch { uri: String, path: String },

    #[error("invalid XPath expression '{expression}': {message}")]
    InvalidXPath { expression: String, message: String },

    #[error("invalid use attribute '{expression}'; {reason}")]
    InvalidUseExpression { expression: String, reason: String },

    #[error("unsupported custom hydration namespace '{prefix}' in '{expression}'")]
    UnsupportedNamespace { prefix: String, expression: String },

    #[error("unsupported custom hydration function '{name}'")]
    UnsupportedFunction { name: String },

    #[error("vn:link source XPath '{expression}' did not resolve to any elements")]
    EmptyLinkSource { expression: String },

    #[error("custom function '{expression}' did not resolve to any target nodes")]
    EmptyExpansion { expression: String },

    #[error("attribute select placeholder must include a non-empty XPath expression")]
    EmptyPlaceholder,

    #[error("attribute select XPath '{expression}' must be absolute or relative")]
    InvalidAttributeSelect { expression: String },

    #[error("attribute select XPath '{expression}' resolved to {count} values; expected exactly one")]
    AttributeSelectCardinality { expression: String, count: usize },

    #[error("encountered select attribute without a value during hydration")]
    EmptySelectValue,

    #[error("select expression '{expression}' must be absolute or relative to the custom function context")]
    InvalidSelectExpression { expression: String },

    #[error("select expression '{expression}' resolved to {count} elements; expected exactly one")]
    SelectCardinality { expression: String, count: usize },

    #[error("XPath '{expression}' requires a context node provided by a custom function")]
    MissingContext { expression: String },

    #[error("cannot hydrate element <{tag}> without a parent; select expression '{expression}' is invalid")]
    MissingParent { tag: String, expression: String },

    #[error("hydration produced no nodes for '{expression}'")]
    EmptyResult { expression: String },
}

impl From<crate::xml::path::XPathError> for HydrationError {
    fn from(error: crate::xml::path::XPathError) -> Self {
        HydrationError::InvalidXPath {
            expression: error.expression,
            message: error.message,
        }
    }
}

/// Dispatch-time invoker fault. Fatal for the request; never retried.
#[derive(Debug, thiserror::Error)]
pub enum InvokerError {
    #[error("task invoker is not configured")]
    NotConfigured,

    #[error("task invocation failed: {message}")]
    Failed { message: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Top-level request failure. Everything the orchestrator's outer scope can
/// observe maps onto one of these kinds.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error("{message}")]
    Validation { message: String },

    #[error(transparent)]
    Hydration(#[from] HydrationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Invoker(#[from] InvokerError),

    #[error("timed out waiting for group {group_index} completion")]
    Timeout { group_index: usize },

    #[error("group {group_index} failed: {detail}")]
    TaskFailure { group_index: usize, detail: String },

    #[error("task result for '{key}' is unusable: {message}")]
    InvalidTaskResult { key: String, message: String },
}

impl OrchestrationError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}
