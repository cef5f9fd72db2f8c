//! Execution runtime for driving external coding-agent CLIs.
//!
//! - [`event`]: the normalized vocabulary every engine's output is mapped to.
//! - [`engine`]: the [`Engine`](engine::Engine) trait, one adapter per CLI,
//!   and the process runner with timeout and cancellation.
//! - [`display`]: live terminal view driven by a spinner state machine.
//! - [`looping`]: task source, retry policy and the iteration loop.

pub mod display;
pub mod engine;
pub mod event;
pub mod looping;
