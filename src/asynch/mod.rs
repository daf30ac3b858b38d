pub mod pwr;
pub mod runner;
pub mod state;

pub use pwr::{ChipPower, PwrKey};
pub use runner::Runner;
pub use state::{Retry, RetryPolicy, SessionState};
