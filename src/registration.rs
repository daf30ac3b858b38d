use embassy_time::{Duration, Instant};
use serde::Serialize;

#[derive(Debug, Clone, Default)]
pub struct CellularRegistrationStatus {
    status: Status,
    updated: Option<Instant>,
    started: Option<Instant>,
}

impl CellularRegistrationStatus {
    pub const fn new() -> Self {
        Self {
            status: Status::None,
            updated: None,
            started: None,
        }
    }

    pub fn duration(&self, ts: Instant) -> Duration {
        self.started
            .and_then(|started| ts.checked_duration_since(started))
            .unwrap_or_else(|| Duration::from_millis(0))
    }

    pub fn started(&self) -> Option<Instant> {
        self.started
    }

    pub fn updated(&self) -> Option<Instant> {
        self.updated
    }

    pub fn reset(&mut self) {
        self.status = Status::None;
        self.updated = None;
        self.started = None;
    }

    pub fn get_status(&self) -> Status {
        self.status
    }

    pub fn set_status(&mut self, stat: Status) {
        let ts = Instant::now();
        if self.status != stat {
            self.status = stat;
            self.started = Some(ts);
        }
        self.updated = Some(ts);
    }

    pub fn registered(&self) -> bool {
        self.status.is_registered()
    }
}

/// `<stat>` of `+CREG`.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Status {
    #[default]
    None,
    NotRegistering,
    Home,
    Searching,
    Denied,
    OutOfCoverage,
    Roaming,
}

impl Status {
    pub fn is_registered(&self) -> bool {
        matches!(self, Self::Home | Self::Roaming)
    }
}

impl From<u8> for Status {
    fn from(v: u8) -> Self {
        match v {
            0 => Self::NotRegistering,
            1 => Self::Home,
            2 => Self::Searching,
            3 => Self::Denied,
            4 => Self::OutOfCoverage,
            5 => Self::Roaming,
            _ => Self::None,
        }
    }
}

/// Signal quality as reported by `+CSQ: <rssi>,<ber>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SignalQuality {
    pub rssi: u8,
    pub ber: u8,
}

impl SignalQuality {
    /// `0` means no signal, `99` means not known or not detectable.
    pub fn in_range(&self) -> bool {
        (1..=98).contains(&self.rssi)
    }

    /// Approximate received power in dBm, for `rssi` in range.
    pub fn dbm(&self) -> Option<i16> {
        self.in_range().then(|| -113 + 2 * self.rssi as i16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_codes() {
        assert_eq!(Status::from(1), Status::Home);
        assert_eq!(Status::from(5), Status::Roaming);
        assert_eq!(Status::from(7), Status::None);
        assert!(!Status::from(2).is_registered());
    }

    #[test]
    fn status_timestamps() {
        let mut status = CellularRegistrationStatus::new();
        assert!(!status.registered());

        status.set_status(Status::Searching);
        let started = status.started();
        status.set_status(Status::Searching);
        assert_eq!(status.started(), started);

        status.set_status(Status::Home);
        assert!(status.registered());
        assert!(status.started() >= started);

        status.reset();
        assert_eq!(status.get_status(), Status::None);
        assert_eq!(status.updated(), None);
    }

    #[test]
    fn rssi_bounds() {
        let q = |rssi| SignalQuality { rssi, ber: 0 };
        assert!(!q(0).in_range());
        assert!(q(1).in_range());
        assert!(q(98).in_range());
        assert!(!q(99).in_range());
        assert_eq!(q(15).dbm(), Some(-83));
        assert_eq!(q(99).dbm(), None);
    }
}
