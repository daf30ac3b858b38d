use embassy_time::Duration;

/// Low time of `PWRKEY` to trigger module switch on from power off mode
pub fn pwr_on_time() -> Duration {
    Duration::from_millis(1100)
}

/// Low time of `PWRKEY` to trigger module graceful switch off
pub fn pwr_off_time() -> Duration {
    Duration::from_millis(1500)
}

/// Time to wait for the module to boot, before sampling `STATUS` again
pub fn boot_time() -> Duration {
    Duration::from_secs(3)
}

/// Upper bound on `PWRKEY` pulses before giving up on the status pin
pub const PWR_ON_ATTEMPTS: usize = 5;
