use embassy_time::Duration;
use embedded_hal::digital::{ErrorType, InputPin, OutputPin};

use crate::apn::{OperatorProfile, DEFAULT_OPERATORS};
use crate::asynch::pwr::ChipPower;

pub struct NoPin;

impl ErrorType for NoPin {
    type Error = core::convert::Infallible;
}

impl InputPin for NoPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(true)
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(false)
    }
}

impl OutputPin for NoPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Protocol timeouts and settle times.
///
/// `Timing::DEFAULT` follows the SIM800 series AT command manual and the
/// behaviour observed on real modules. Everything is a plain field so a board
/// (or a test) can shorten or stretch individual values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Timing {
    /// Pause between two polls of the transport while waiting for bytes.
    pub poll_interval: Duration,
    /// Default deadline for a single command response.
    pub command_timeout: Duration,
    /// Deadline for the `AT` check used to see if the chip is awake.
    pub alive_timeout: Duration,
    /// Time the chip needs after `AT+CFUN=1,1` before it answers again.
    pub reboot_wait: Duration,
    /// Delay between writing `ATZ`/`ATE0` and reading their answer.
    pub reset_settle: Duration,
    /// Deadline for the answer to `ATZ`/`ATE0`.
    pub reset_timeout: Duration,
    /// Back-off after a failed wake-up.
    pub wake_retry: Duration,
    /// Deadline for `AT+CSMINS?`.
    pub sim_timeout: Duration,
    /// Back-off between two SIM presence checks.
    pub sim_retry: Duration,
    /// Delay between `AT+CSQ` and reading the answer.
    pub signal_settle: Duration,
    /// Back-off between two signal quality checks.
    pub signal_retry: Duration,
    /// Overall window for network registration.
    pub registration_timeout: Duration,
    /// Interval between two `AT+CREG?` polls.
    pub registration_poll: Duration,
    /// Back-off before power cycling after a registration timeout.
    pub registration_backoff: Duration,
    /// Deadline for `AT+COPS?`.
    pub operator_timeout: Duration,
    /// Deadline for bearer and GPRS attach commands.
    pub bearer_timeout: Duration,
    /// Delay between `AT+SAPBR=2,1` and reading the assigned address.
    pub ip_settle: Duration,
    /// Back-off after a failed bearer attach.
    pub attach_retry: Duration,
    /// Deadline for `AT+CIPSHUT`.
    pub shut_timeout: Duration,
    /// Deadline for the `CONNECT OK` confirmation of a TCP open.
    pub tcp_connect_timeout: Duration,
    /// Deadline for `DATA ACCEPT` after a socket send.
    pub send_accept_timeout: Duration,
    /// Deadline for raw payload bytes following a read header.
    pub raw_read_timeout: Duration,
    /// Delay after `AT+HTTPTERM`.
    pub http_term_settle: Duration,
    /// Deadline for `+HTTPACTION` of a GET.
    pub http_action_timeout: Duration,
    /// Deadline for the `OK` after an HTTP upload.
    pub http_upload_timeout: Duration,
    /// Per-attempt deadline while polling `+HTTPACTION` of a POST.
    pub http_post_poll: Duration,
    /// Delay between `AT+CIPGSMLOC` and reading the answer.
    pub location_settle: Duration,
    /// Deadline for `+CIPGSMLOC`.
    pub location_timeout: Duration,
}

impl Timing {
    pub const DEFAULT: Self = Self {
        poll_interval: Duration::from_millis(1),
        command_timeout: Duration::from_millis(1000),
        alive_timeout: Duration::from_millis(100),
        reboot_wait: Duration::from_secs(5),
        reset_settle: Duration::from_secs(1),
        reset_timeout: Duration::from_secs(5),
        wake_retry: Duration::from_secs(3),
        sim_timeout: Duration::from_secs(3),
        sim_retry: Duration::from_secs(60),
        signal_settle: Duration::from_secs(3),
        signal_retry: Duration::from_secs(10),
        registration_timeout: Duration::from_secs(30),
        registration_poll: Duration::from_secs(1),
        registration_backoff: Duration::from_secs(20),
        operator_timeout: Duration::from_secs(3),
        bearer_timeout: Duration::from_secs(30),
        ip_settle: Duration::from_secs(2),
        attach_retry: Duration::from_secs(3),
        shut_timeout: Duration::from_secs(5),
        tcp_connect_timeout: Duration::from_secs(30),
        send_accept_timeout: Duration::from_secs(3),
        raw_read_timeout: Duration::from_secs(5),
        http_term_settle: Duration::from_millis(100),
        http_action_timeout: Duration::from_secs(60),
        http_upload_timeout: Duration::from_secs(5),
        http_post_poll: Duration::from_secs(5),
        location_settle: Duration::from_secs(3),
        location_timeout: Duration::from_secs(10),
    };
}

impl Default for Timing {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Board and network configuration of a SIM800 device.
pub trait CellularConfig {
    type Power: ChipPower;

    const TIMING: Timing = Timing::DEFAULT;

    /// Operator catalog used to pick APN credentials from the name reported
    /// by `AT+COPS?`.
    const OPERATORS: &'static [OperatorProfile] = &DEFAULT_OPERATORS;
    /// Index into `OPERATORS` used until an operator has been detected.
    const INITIAL_OPERATOR: usize = 0;

    /// Largest single `+HTTPREAD` chunk that will be accepted.
    const HTTP_READ_CEILING: usize = crate::http::HTTP_READ_CEILING;
    /// Largest firmware image that will be written to the update sink.
    const FIRMWARE_MAX_SIZE: usize = crate::firmware::FIRMWARE_MAX_SIZE;

    fn power(&mut self) -> &mut Self::Power;
}
