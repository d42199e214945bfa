//! Dispatches resolved requests over HTTP and drives multi-step flows.
//!
//! Neither module ever raises [`workbench_core::error::AppError`]: transport
//! and script failures are folded into `ExecuteResult`/`FlowResult` fields
//! per the error handling design, so server handlers always get a 200 with
//! a structured body even when the underlying HTTP call failed.

pub mod flow;
pub mod request;
pub mod result;
#[cfg(test)]
mod test_support;

pub use flow::FlowRunner;
pub use request::RequestExecutor;
pub use result::{ExecuteOverrides, ExecuteResult, FlowResult, StepResult};
