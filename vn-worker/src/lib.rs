//! Stateless task processor: reads dispatched valuation payloads, evaluates
//! them, writes the result blob, and publishes per-task updates.

pub mod processor;

pub use crate::processor::PriceEvaluator;
pub use crate::processor::TaskContext;
pub use crate::processor::TaskProcessor;
pub use crate::processor::ValuationEvaluator;
pub use crate::processor::WorkerError;
