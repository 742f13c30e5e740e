//! Foundation module
//!
//! Math aliases and pose helpers, logging setup, and the frame clock.

pub mod logging;
pub mod math;
pub mod time;
