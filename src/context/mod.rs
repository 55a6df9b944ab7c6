//! The test context
//!
//! A [`TestContext`] is what a test body receives. Through it the body
//! registers asynchronous work ([`Async`](crate::completion::Async) handles),
//! reports failures, asserts, and shares data with other tests through
//! [`Attributes`].

mod assertions;
mod attributes;
mod test_context;

pub use attributes::{Attribute, Attributes};
pub use test_context::{TestContext, TestContextBuilder, UnhandledFailureHandler};
