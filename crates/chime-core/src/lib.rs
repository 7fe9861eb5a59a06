//! `chime-core` — shared foundation for the chime workspace.
//!
//! Holds the pieces every other crate needs: the layered configuration
//! loader ([`config::ChimeConfig`]), the bootstrap error type, and the
//! injectable [`clock::Clock`] abstraction that makes due-time and
//! lease-expiry behaviour testable.

pub mod clock;
pub mod config;
pub mod error;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ChimeConfig;
pub use error::{ChimeError, Result};
