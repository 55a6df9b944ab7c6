//! Completion handles for asynchronous tests.
//!
//! A test signals outstanding asynchronous work by asking its
//! [`TestContext`](crate::context::TestContext) for an [`Async`] handle. The
//! test only ends once every handle it created has resolved (or once it has
//! failed).
//!
//! Each handle is paired with an internal release record that lives in the
//! test's set of pending work. When the test ends, the record delivers the
//! test's final outcome to anyone awaiting [`Async::released`].

mod handle;
mod release;

pub use handle::{Async, HandleId};
pub use release::{Release, ReleaseOutcome};

pub(crate) use release::ReleaseSignal;
