//! HTTP implementation of the engine's [`Dispatcher`] seam.
//!
//! [`HttpDispatcher`] turns a claimed schedule's [`DispatchCall`] into one
//! scenario-run request and maps the result onto the engine's three-way
//! [`Outcome`]. It keeps no state between calls; retries, backoff and
//! bookkeeping all live in `chime-scheduler`.
//!
//! [`Dispatcher`]: chime_scheduler::Dispatcher
//! [`DispatchCall`]: chime_scheduler::DispatchCall
//! [`Outcome`]: chime_scheduler::Outcome

pub mod error;
pub mod http;

pub use error::{DispatchError, Result};
pub use http::HttpDispatcher;
