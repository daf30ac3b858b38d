#![cfg_attr(not(test), no_std)]
#![allow(async_fn_in_trait)]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod apn;
pub mod asynch;
pub mod command;
pub mod config;
pub mod error;
pub mod firmware;
mod gprs;
pub mod gsm;
pub mod http;
mod module_timing;
pub mod registration;
pub mod socket;

#[cfg(test)]
mod test_helpers;

pub use asynch::runner::Runner;
pub use asynch::state::{Retry, RetryPolicy, SessionState};
pub use config::{CellularConfig, Timing};
pub use error::Error;
