//! # testkit-unit 🧪
//!
//! > Tests that finish when their asynchronous work does
//!
//! **testkit-unit** runs test bodies that can declare outstanding
//! asynchronous work through countdown handles. A test ends when its body
//! returned and every handle resolved, when it fails, or when it times out;
//! whichever comes first decides the result, and it is decided exactly once.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::time::Duration;
//! use testkit_unit::prelude::*;
//!
//! let result = run_test(TestOptions::new().with_timeout(Duration::from_secs(5)), |ctx| {
//!     let handle = ctx.async_count(2)?;
//!     for _ in 0..2 {
//!         let handle = handle.clone();
//!         std::thread::spawn(move || handle.count_down().unwrap());
//!     }
//!     ctx.assert_equals(4, 2 + 2)
//! });
//!
//! assert!(result.succeeded());
//! ```
//!
//! ## Features
//!
//! - ⏳ **Completion handles** - Countdown tokens for pending async work
//! - 🧭 **Test context** - Assertions, failure routing and shared attributes
//! - ⏱️ **Timeouts** - One shared watchdog thread for every deadline
//! - 📋 **Sequential runner** - Suites with setup and teardown hooks
//! - 🔌 **Execution modes** - Inline, dedicated threads, tokio, async-std, smol

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod completion;
pub mod context;
pub mod error;
pub mod options;
pub mod runner;
pub mod runtime;
pub mod step;

/// Prelude for convenient imports
///
/// ```rust
/// use testkit_unit::prelude::*;
/// ```
pub mod prelude {
    pub use crate::completion::{Async, Release};
    pub use crate::context::{Attributes, TestContext};
    pub use crate::error::{Error, Failure, Result};
    pub use crate::options::TestOptions;
    pub use crate::runner::{run_test, SequentialRunner, SuiteExec, SuiteResults, TestSuite};
    pub use crate::runtime::{DedicatedThread, ExecutionMode, Inline};
    pub use crate::step::TestResult;
}

// Re-exports
pub use error::{Error, Failure, Result};

// Re-export the test macro when macros feature is enabled
#[cfg(feature = "macros")]
pub use testkit_unit_macros::test;
