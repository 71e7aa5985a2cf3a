//! Shared test utilities for filevert integration tests.
//!
//! - `FakeProvider` and `FakeObjectStore`: in-process HTTP servers standing
//!   in for the conversion provider and object storage
//! - `TestHarness`: a service wired to both fakes over real HTTP clients

pub mod fakes;
pub mod harness;

pub use fakes::*;
pub use harness::TestHarness;
