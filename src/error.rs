#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    // Protocol errors
    /// No (complete) response arrived before the deadline.
    Timeout,
    /// A line arrived, but it did not match the expected literal or pattern.
    Mismatch,
    /// An advertised length, or a command, exceeds a fixed buffer or safety
    /// ceiling.
    Overflow,
    /// The underlying transport reported an error.
    Io,
    /// A transfer ended before the advertised number of bytes arrived.
    Truncated,

    // General device errors
    /// The module announced a power down while a command was in flight.
    PoweredDown,
    StateTimeout,
    Cancelled,

    // Network errors
    NoSim,
    NoSignal,
    NotRegistered,
    AttachFailed,

    // Service specific errors
    Http(u16),
    EmptyImage,
    Firmware,
}
