//! Orchestrates XML-described valuation requests: hydrates the request tree,
//! fans each group's valuations out to stateless workers, collects their
//! completions from a shared event log, and assembles the hydrated response.

pub mod collector;
pub mod constants;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod hydration;
pub mod invoker;
pub mod orchestrator;
pub mod store;
pub mod xml;

pub use crate::error::HydrationError;
pub use crate::error::InvokerError;
pub use crate::error::OrchestrationError;
pub use crate::error::ResourceFetchError;
pub use crate::event::RequestEvent;
pub use crate::event::TaskDescriptor;
pub use crate::event::TaskDispatch;
pub use crate::event::TaskUpdate;
pub use crate::hydration::HydrationEngine;
pub use crate::hydration::HydrationItem;
pub use crate::invoker::TaskInvoker;
pub use crate::orchestrator::RequestOrchestrator;
pub use crate::orchestrator::RunOutcome;
pub use crate::store::Store;
