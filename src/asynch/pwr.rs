use embassy_time::{Duration, Timer};
use embedded_hal::digital::{InputPin, OutputPin};

use crate::config::NoPin;
use crate::module_timing::{boot_time, pwr_off_time, pwr_on_time, PWR_ON_ATTEMPTS};

/// Physical power switch of the module.
pub trait ChipPower {
    /// Switch the chip on (`true`) or off (`false`). Returns whether the chip
    /// is believed to be awake afterwards.
    async fn chip_power(&mut self, on: bool) -> bool;
}

/// [`ChipPower`] through the `PWRKEY` line, optionally confirmed by the
/// `STATUS` output of the module.
pub struct PwrKey<K, S = NoPin> {
    key: K,
    status: Option<S>,
    on_pulse: Duration,
    off_pulse: Duration,
    boot: Duration,
}

impl<K: OutputPin> PwrKey<K, NoPin> {
    pub fn new(key: K) -> Self {
        Self {
            key,
            status: None,
            on_pulse: pwr_on_time(),
            off_pulse: pwr_off_time(),
            boot: boot_time(),
        }
    }
}

impl<K: OutputPin, S: InputPin> PwrKey<K, S> {
    pub fn with_status(key: K, status: S) -> Self {
        Self {
            key,
            status: Some(status),
            on_pulse: pwr_on_time(),
            off_pulse: pwr_off_time(),
            boot: boot_time(),
        }
    }

    pub fn with_timing(mut self, on_pulse: Duration, off_pulse: Duration, boot: Duration) -> Self {
        self.on_pulse = on_pulse;
        self.off_pulse = off_pulse;
        self.boot = boot;
        self
    }

    /// `None` without a status pin.
    fn has_power(&mut self) -> Option<bool> {
        let pin = self.status.as_mut()?;
        match pin.is_high() {
            Ok(high) => Some(high),
            Err(_) => {
                error!("Failed to read STATUS pin");
                None
            }
        }
    }

    async fn pulse(&mut self, low_time: Duration) {
        self.key.set_low().ok();
        Timer::after(low_time).await;
        self.key.set_high().ok();
    }

    async fn power_up(&mut self) -> bool {
        if self.has_power() == Some(true) {
            debug!("Module already powered");
            return true;
        }

        for attempt in 1..=PWR_ON_ATTEMPTS {
            debug!("Pulsing PWRKEY, attempt {}", attempt);
            self.pulse(self.on_pulse).await;
            Timer::after(self.boot).await;

            match self.has_power() {
                Some(true) => {
                    debug!("Powered up");
                    return true;
                }
                Some(false) => continue,
                None => {
                    info!("No STATUS pin configured, assuming powered up");
                    return true;
                }
            }
        }

        warn!("Module did not power up after {} PWRKEY pulses", PWR_ON_ATTEMPTS);
        false
    }

    async fn power_down(&mut self) -> bool {
        if self.has_power() == Some(false) {
            return false;
        }
        self.pulse(self.off_pulse).await;
        Timer::after(self.boot).await;
        debug!("Powered down");
        self.has_power().unwrap_or(false)
    }
}

impl<K: OutputPin, S: InputPin> ChipPower for PwrKey<K, S> {
    async fn chip_power(&mut self, on: bool) -> bool {
        if on {
            self.power_up().await
        } else {
            self.power_down().await
        }
    }
}
