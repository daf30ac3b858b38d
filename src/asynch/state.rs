use serde::Serialize;

/// Where the session bring-up currently stands.
///
/// States are entered in declaration order; `Failed` is only reached when a
/// [`RetryPolicy`] runs out or the run is cancelled.
#[derive(Debug, PartialEq, Eq, Clone, Copy, PartialOrd, Ord, Serialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionState {
    Unpowered = 0,
    Booting = 1,
    AwaitingSim = 2,
    CheckingSignal = 3,
    Registering = 4,
    Attaching = 5,
    Ready = 6,
    Failed = 7,
}

impl TryFrom<isize> for SessionState {
    type Error = ();

    fn try_from(value: isize) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Unpowered),
            1 => Ok(Self::Booting),
            2 => Ok(Self::AwaitingSim),
            3 => Ok(Self::CheckingSignal),
            4 => Ok(Self::Registering),
            5 => Ok(Self::Attaching),
            6 => Ok(Self::Ready),
            7 => Ok(Self::Failed),
            _ => Err(()),
        }
    }
}

/// How often a failing step is retried.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Retry {
    Forever,
    /// Total number of attempts, including the first one.
    Attempts(u32),
}

impl Retry {
    /// `true` if another attempt is allowed after `failures` failed ones.
    pub fn allows(&self, failures: u32) -> bool {
        match self {
            Self::Forever => true,
            Self::Attempts(n) => failures < *n,
        }
    }
}

/// Per state retry budget of [`Runner::run`](super::runner::Runner::run).
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RetryPolicy {
    pub wake: Retry,
    pub sim: Retry,
    pub signal: Retry,
    pub registration: Retry,
    pub attach: Retry,
}

impl RetryPolicy {
    /// Keep trying until the session is up.
    pub const UNBOUNDED: Self = Self {
        wake: Retry::Forever,
        sim: Retry::Forever,
        signal: Retry::Forever,
        registration: Retry::Forever,
        attach: Retry::Forever,
    };

    /// Budget governing `state`, if a failure there is retried at all.
    pub fn for_state(&self, state: SessionState) -> Option<Retry> {
        match state {
            SessionState::Unpowered => Some(self.wake),
            // Booting steps are best effort and never fail
            SessionState::Booting => None,
            SessionState::AwaitingSim => Some(self.sim),
            SessionState::CheckingSignal => Some(self.signal),
            SessionState::Registering => Some(self.registration),
            SessionState::Attaching => Some(self.attach),
            SessionState::Ready | SessionState::Failed => None,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::UNBOUNDED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempts_budget() {
        assert!(Retry::Attempts(2).allows(1));
        assert!(!Retry::Attempts(2).allows(2));
        assert!(Retry::Forever.allows(u32::MAX));
    }

    #[test]
    fn states_are_ordered() {
        assert!(SessionState::Unpowered < SessionState::Ready);
        assert_eq!(
            SessionState::try_from(SessionState::Registering as isize + 1),
            Ok(SessionState::Attaching)
        );
        assert_eq!(SessionState::try_from(8), Err(()));
    }
}
