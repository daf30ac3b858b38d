//! Unsolicited result codes of the SIM800 series.
//!
//! The modem may push these between a command and its response. They carry
//! no answer to the command in flight and are skipped by the response
//! matcher.

/// Notification recognised by its line prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Urc {
    /// `+CIPRXGET: 1,` incoming socket data
    SocketDataAvailable,
    /// `+FTPGET: 1,` FTP state change
    FtpGet,
    /// `+PDP: DEACT`
    PdpDeactivated,
    /// `+SAPBR 1: DEACT` bearer closed by the network
    BearerDeactivated,
    /// `*PSNWID:` network name pushed after `AT+CLTS`
    NetworkName,
    /// `*PSUTTZ:` network time
    NetworkTime,
    /// `+CTZV:` time zone
    TimeZone,
    /// `DST:` daylight saving information
    DaylightSaving,
    /// `+CIEV:` indicator event
    Indicator,
    /// `RDY`
    Ready,
    /// `+CPIN: READY`
    SimReady,
    /// `Call Ready`
    CallReady,
    /// `SMS Ready`
    SmsReady,
    /// `NORMAL POWER DOWN`
    NormalPowerDown,
    /// `UNDER-VOLTAGE POWER DOWN`
    UnderVoltagePowerDown,
    /// `UNDER-VOLTAGE WARNNING` (sic)
    UnderVoltageWarning,
    /// `OVER-VOLTAGE POWER DOWN`
    OverVoltagePowerDown,
    /// `OVER-VOLTAGE WARNNING` (sic)
    OverVoltageWarning,
}

impl Urc {
    /// `true` for notices announcing that the module is about to, or did,
    /// switch itself off.
    pub fn is_power_down(&self) -> bool {
        matches!(
            self,
            Self::NormalPowerDown | Self::UnderVoltagePowerDown | Self::OverVoltagePowerDown
        )
    }
}

/// Prefix table, checked in order.
pub const URC_TABLE: [(&[u8], Urc); 18] = [
    (b"+CIPRXGET: 1,", Urc::SocketDataAvailable),
    (b"+FTPGET: 1,", Urc::FtpGet),
    (b"+PDP: DEACT", Urc::PdpDeactivated),
    (b"+SAPBR 1: DEACT", Urc::BearerDeactivated),
    (b"*PSNWID:", Urc::NetworkName),
    (b"*PSUTTZ:", Urc::NetworkTime),
    (b"+CTZV:", Urc::TimeZone),
    (b"DST:", Urc::DaylightSaving),
    (b"+CIEV:", Urc::Indicator),
    (b"RDY", Urc::Ready),
    (b"+CPIN: READY", Urc::SimReady),
    (b"Call Ready", Urc::CallReady),
    (b"SMS Ready", Urc::SmsReady),
    (b"NORMAL POWER DOWN", Urc::NormalPowerDown),
    (b"UNDER-VOLTAGE POWER DOWN", Urc::UnderVoltagePowerDown),
    (b"UNDER-VOLTAGE WARNNING", Urc::UnderVoltageWarning),
    (b"OVER-VOLTAGE POWER DOWN", Urc::OverVoltagePowerDown),
    (b"OVER-VOLTAGE WARNNING", Urc::OverVoltageWarning),
];

/// Returns the notification `line` starts with, if any.
pub fn classify(line: &[u8]) -> Option<Urc> {
    URC_TABLE
        .iter()
        .find(|(prefix, _)| line.starts_with(prefix))
        .map(|(_, urc)| *urc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_are_recognised() {
        assert_eq!(classify(b"+CIPRXGET: 1,0"), Some(Urc::SocketDataAvailable));
        assert_eq!(classify(b"+PDP: DEACT"), Some(Urc::PdpDeactivated));
        assert_eq!(
            classify(b"*PSUTTZ: 2026,10,16,9,0,0,\"+12\",0"),
            Some(Urc::NetworkTime)
        );
        assert_eq!(classify(b"RDY"), Some(Urc::Ready));
        assert_eq!(
            classify(b"UNDER-VOLTAGE WARNNING"),
            Some(Urc::UnderVoltageWarning)
        );
    }

    #[test]
    fn responses_are_not_urcs() {
        assert_eq!(classify(b"OK"), None);
        assert_eq!(classify(b"+CIPRXGET: 2,0,128,128"), None);
        assert_eq!(classify(b"+CPIN: SIM PIN"), None);
        assert_eq!(classify(b"RD"), None);
        assert_eq!(classify(b""), None);
    }

    #[test]
    fn power_down_notices() {
        assert!(Urc::UnderVoltagePowerDown.is_power_down());
        assert!(!Urc::UnderVoltageWarning.is_power_down());
    }
}
