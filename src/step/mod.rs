//! Test step execution
//!
//! A step is one execution attempt of a test body. It tracks the completion
//! handles the body registers, an optional timeout, and decides when the
//! test is over:
//!
//! ```text
//! Running ──► AwaitingAsync ──► Complete
//!    └───────────────────────────┘
//! ```
//!
//! A step leaves `Running` when its body returns (or the timeout fires). It
//! completes once no handle is pending, or as soon as it has a failure and
//! is no longer running. It then produces exactly one [`TestResult`].

mod execution;
mod result;
mod watchdog;

pub use execution::StepPhase;
pub use result::TestResult;
pub use watchdog::{TimerGuard, Watchdog};

pub(crate) use execution::Step;
pub(crate) use watchdog::on_watchdog_thread;
