use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Timer};
use embedded_io::ReadReady;
use embedded_io_async::{Read, Write};
use no_std_net::Ipv4Addr;

use super::state::{Retry, RetryPolicy, SessionState};
use crate::apn::{select_operator, OperatorProfile};
use crate::asynch::pwr::ChipPower as _;
use crate::command::{AtClient, Expectation, OK};
use crate::config::CellularConfig;
use crate::error::Error;
use crate::firmware::{self, FirmwareSink};
use crate::http::HttpClient;
use crate::registration::{CellularRegistrationStatus, SignalQuality, Status};
use crate::socket::TcpSocket;

/// Session driver for a SIM800 module.
///
/// Owns the AT channel and walks the module from power on to an attached
/// GPRS bearer. Call [`run`](Self::run) until it returns `Ok`, then use
/// [`tcp`](Self::tcp), [`http`](Self::http) or
/// [`update_firmware`](Self::update_firmware) on the same runner.
pub struct Runner<T, C: CellularConfig> {
    pub(crate) at: AtClient<T>,
    pub(crate) config: C,
    state: SessionState,
    pub(crate) operator: usize,
    registration: CellularRegistrationStatus,
    signal: Option<SignalQuality>,
    local_ip: Option<Ipv4Addr>,
}

impl<T, C> Runner<T, C>
where
    T: Read + Write + ReadReady,
    C: CellularConfig,
{
    pub fn new(transport: T, config: C) -> Self {
        Self {
            at: AtClient::new(transport, C::TIMING),
            config,
            state: SessionState::Unpowered,
            operator: C::INITIAL_OPERATOR,
            registration: CellularRegistrationStatus::new(),
            signal: None,
            local_ip: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// APN credentials currently in use.
    pub fn profile(&self) -> Option<&OperatorProfile> {
        C::OPERATORS.get(self.operator)
    }

    /// Last signal quality seen while bringing the session up.
    pub fn signal(&self) -> Option<SignalQuality> {
        self.signal
    }

    pub fn registration(&self) -> &CellularRegistrationStatus {
        &self.registration
    }

    pub fn local_ip(&self) -> Option<Ipv4Addr> {
        self.local_ip
    }

    /// Raw access to the AT channel.
    pub fn at(&mut self) -> &mut AtClient<T> {
        &mut self.at
    }

    pub fn config(&mut self) -> &mut C {
        &mut self.config
    }

    /// The single TCP socket of the module, using the active APN.
    pub fn tcp(&mut self) -> TcpSocket<'_, T> {
        let profile = C::OPERATORS.get(self.operator).copied();
        TcpSocket::new(&mut self.at, profile)
    }

    pub fn http(&mut self) -> HttpClient<'_, T> {
        HttpClient::new(&mut self.at, C::HTTP_READ_CEILING)
    }

    /// Download the image at `url` into `sink` and select it for the next
    /// boot. Returns the number of bytes written.
    pub async fn update_firmware<S: FirmwareSink>(
        &mut self,
        url: &str,
        sink: &mut S,
    ) -> Result<usize, Error> {
        let max_size = C::FIRMWARE_MAX_SIZE;
        firmware::update(&mut self.http(), url, sink, max_size).await
    }

    /// Drive the session until it is [`Ready`](SessionState::Ready).
    ///
    /// Failed steps are retried as allowed by `policy`, after a back-off
    /// that is cut short by `cancel`. A registration timeout power cycles
    /// the chip and retries the registration. When the policy runs out the
    /// session ends in `Failed`; calling `run` again starts over from
    /// `Unpowered`.
    ///
    /// A cancel is consumed when it is observed, whether it was already
    /// pending when a step finished or arrived during a back-off, so the
    /// next call to `run` is not affected by it.
    pub async fn run<M: RawMutex>(
        &mut self,
        policy: &RetryPolicy,
        cancel: &Signal<M, ()>,
    ) -> Result<(), Error> {
        if self.state == SessionState::Failed {
            info!("Restarting session from scratch");
            self.state = SessionState::Unpowered;
        }

        let mut failures = 0;
        loop {
            if cancel.signaled() {
                cancel.reset();
                return self.fail(Error::Cancelled);
            }
            if self.state == SessionState::Ready {
                return Ok(());
            }

            let state = self.state;
            let err = match self.step().await {
                Ok(next) => {
                    if next != state {
                        failures = 0;
                    }
                    continue;
                }
                Err(err) => err,
            };

            if err == Error::PoweredDown {
                info!("Module powered down, starting over");
                self.registration.reset();
                self.local_ip = None;
                self.state = SessionState::Unpowered;
                failures = 0;
                continue;
            }

            failures += 1;
            let retry = policy.for_state(state).unwrap_or(Retry::Attempts(1));
            if !retry.allows(failures) {
                error!("{:?} failed {} times, giving up: {:?}", state, failures, err);
                return self.fail(Error::StateTimeout);
            }
            warn!("{:?} failed: {:?}, retrying", state, err);

            if let Either::Second(()) = select(Timer::after(self.backoff(state)), cancel.wait()).await {
                return self.fail(Error::Cancelled);
            }

            if state == SessionState::Registering {
                self.power_cycle().await;
            }
        }
    }

    fn fail(&mut self, err: Error) -> Result<(), Error> {
        self.state = SessionState::Failed;
        Err(err)
    }

    fn backoff(&self, state: SessionState) -> Duration {
        let t = &C::TIMING;
        match state {
            SessionState::Unpowered => t.wake_retry,
            SessionState::AwaitingSim => t.sim_retry,
            SessionState::CheckingSignal => t.signal_retry,
            SessionState::Registering => t.registration_backoff,
            SessionState::Attaching => t.attach_retry,
            _ => t.poll_interval,
        }
    }

    /// Attempt the transition out of the current state once.
    ///
    /// On success the new state is returned. On failure the state is left
    /// unchanged so the step can be retried.
    pub async fn step(&mut self) -> Result<SessionState, Error> {
        match self.state {
            SessionState::Unpowered => self.wake().await?,
            SessionState::Booting => self.boot().await,
            SessionState::AwaitingSim => self.check_sim().await?,
            SessionState::CheckingSignal => self.check_signal().await?,
            SessionState::Registering => self.register_network().await?,
            SessionState::Attaching => self.attach().await?,
            SessionState::Ready | SessionState::Failed => return Ok(self.state),
        }

        let next = SessionState::try_from(self.state as isize + 1)
            .unwrap_or(SessionState::Failed);
        debug!("Session state {:?} -> {:?}", self.state, next);
        self.state = next;
        Ok(next)
    }

    /// Make sure the chip answers `AT`, powering and resetting it if not.
    pub async fn wake(&mut self) -> Result<(), Error> {
        let alive = C::TIMING.alive_timeout;
        if self.at.send_and_await("AT", &OK, alive).await.is_ok() {
            return Ok(());
        }

        if self.at.send_and_await("AT", &OK, alive).await.is_ok() {
            debug!("Module already awake");
        } else {
            info!("Module silent, switching it on");
            if !self.config.power().chip_power(true).await {
                warn!("Power switch reports the module is still off");
            }
        }

        self.reset(false).await
    }

    /// Bring the AT interface into a known state: echo off, full
    /// functionality. With `reboot`, the module is soft rebooted first.
    pub async fn reset(&mut self, reboot: bool) -> Result<(), Error> {
        let t = C::TIMING;
        if reboot {
            self.at.expect_ok("AT+CFUN=1,1").await.ok();
            Timer::after(t.reboot_wait).await;
        }

        self.at.expect_ok_retry("AT").await.ok();

        self.at.send("ATZ").await?;
        Timer::after(t.reset_settle).await;
        self.at.await_match(&OK, t.reset_timeout).await.ok();

        for _ in 0..2 {
            self.at.send("ATE0").await?;
            Timer::after(t.reset_settle).await;
            if self.at.await_match(&OK, t.reset_timeout).await.is_ok() {
                break;
            }
        }

        self.at.expect_ok_retry("AT+CFUN=1").await
    }

    /// Soft reboot the module, or cut its power if it does not answer.
    pub async fn shutdown(&mut self) {
        self.power_down().await;
        self.state = SessionState::Unpowered;
    }

    async fn power_down(&mut self) {
        if self.at.expect_ok("AT+CFUN=1,1").await.is_ok() {
            Timer::after(C::TIMING.reboot_wait).await;
        } else {
            warn!("Module did not take the reboot, using power key");
            self.config.power().chip_power(false).await;
        }
        self.registration.reset();
        self.local_ip = None;
    }

    async fn power_cycle(&mut self) {
        info!("Power cycling module");
        self.power_down().await;
        if let Err(e) = self.wake().await {
            warn!("Wake after power cycle failed: {:?}", e);
        }
    }

    async fn boot(&mut self) {
        for cmd in ["AT", "AT+CSCLK=0", "AT+CNMI=0,0,0,0,0", "AT+GSMBUSY=1"] {
            if let Err(e) = self.at.expect_ok(cmd).await {
                debug!("{} failed: {:?}", cmd, e);
            }
        }

        match self.battery().await {
            Ok(battery) => info!(
                "Battery at {}% ({} mV)",
                battery.percent,
                battery.voltage_mv
            ),
            Err(e) => debug!("Battery query failed: {:?}", e),
        }
        if let Err(e) = self.adc().await {
            debug!("ADC query failed: {:?}", e);
        }
    }

    async fn check_sim(&mut self) -> Result<(), Error> {
        let t = C::TIMING;
        self.at
            .send_and_await(
                "AT+CSMINS?",
                &Expectation::Literal("+CSMINS: 0,1"),
                t.sim_timeout,
            )
            .await
            .map_err(|e| unless_powered_down(e, Error::NoSim))?;
        self.at.await_ok().await.ok();
        Ok(())
    }

    async fn check_signal(&mut self) -> Result<(), Error> {
        let quality = self.signal_quality().await.map_err(|e| {
            debug!("Signal query failed: {:?}", e);
            unless_powered_down(e, Error::NoSignal)
        })?;
        self.signal = Some(quality);
        if !quality.in_range() {
            warn!("No usable signal, RSSI {}", quality.rssi);
            return Err(Error::NoSignal);
        }
        info!("Signal RSSI {}, BER {}", quality.rssi, quality.ber);
        Ok(())
    }

    async fn register_network(&mut self) -> Result<(), Error> {
        let t = C::TIMING;
        self.at.expect_ok("AT").await.ok();

        let deadline = Instant::now() + t.registration_timeout;
        loop {
            match self
                .at
                .send_and_await(
                    "AT+CREG?",
                    &Expectation::Fields("+CREG: 0,%d"),
                    t.command_timeout,
                )
                .await
            {
                Ok(caps) => {
                    let stat = caps.int(0).and_then(|v| u8::try_from(v).ok());
                    self.registration
                        .set_status(stat.map(Status::from).unwrap_or_default());
                }
                Err(Error::PoweredDown) => return Err(Error::PoweredDown),
                Err(e) => trace!("Registration poll failed: {:?}", e),
            }

            if self.registration.registered() {
                info!(
                    "Registered to network: {:?}",
                    self.registration.get_status()
                );
                return Ok(());
            }
            if Instant::now() >= deadline {
                warn!(
                    "Not registered, {:?} for {} ms",
                    self.registration.get_status(),
                    self.registration.duration(Instant::now()).as_millis()
                );
                return Err(Error::NotRegistered);
            }
            Timer::after(t.registration_poll).await;
        }
    }

    async fn attach(&mut self) -> Result<(), Error> {
        let t = C::TIMING;
        match self
            .at
            .send_and_await(
                "AT+CGATT?",
                &Expectation::Fields("+CGATT: %d"),
                t.operator_timeout,
            )
            .await
        {
            Ok(caps) => debug!("GPRS attached: {}", caps.int(0) == Some(1)),
            Err(e) => debug!("GPRS attach query failed: {:?}", e),
        }

        self.set_operator().await;
        if let Err(e) = self.configure_bearer().await {
            warn!("Bearer profile setup failed: {:?}", e);
        }
        if let Err(e) = self
            .at
            .send_and_await("AT+SAPBR=1,1", &OK, t.bearer_timeout)
            .await
        {
            debug!("Bearer open failed: {:?}", e);
        }

        let ip = match self.query_ip().await {
            Ok(ip) if !ip.is_unspecified() => ip,
            first => {
                debug!(
                    "No address assigned yet ({:?}), asking again",
                    first.map(|ip| ip.octets())
                );
                self.query_ip()
                    .await
                    .ok()
                    .filter(|ip| !ip.is_unspecified())
                    .ok_or(Error::AttachFailed)?
            }
        };

        info!("Bearer up, local address {:?}", ip.octets());
        self.local_ip = Some(ip);
        Ok(())
    }

    /// Pick APN credentials matching the operator the module is camped on.
    pub async fn set_operator(&mut self) {
        let timeout = C::TIMING.operator_timeout;
        match self
            .at
            .send_and_await(
                "AT+COPS?",
                &Expectation::Fields("+COPS: %*d,%*d,\"%[^\"]\""),
                timeout,
            )
            .await
        {
            Ok(caps) => {
                let reported = caps.str(0).unwrap_or_default();
                self.operator = select_operator(C::OPERATORS, self.operator, reported);
            }
            Err(e) => warn!("Operator query failed: {:?}", e),
        }
    }

    async fn query_ip(&mut self) -> Result<Ipv4Addr, Error> {
        let t = C::TIMING;
        self.at.send("AT+SAPBR=2,1").await?;
        Timer::after(t.ip_settle).await;
        let caps = self
            .at
            .await_match(
                &Expectation::Fields("+SAPBR: 1,%d,\"%d.%d.%d.%d\""),
                t.command_timeout,
            )
            .await
            .map_err(|_| Error::AttachFailed)?;

        // Bearer status is ignored, only the address counts
        let mut octets = [0u8; 4];
        for (i, octet) in octets.iter_mut().enumerate() {
            *octet = caps
                .int(i + 1)
                .and_then(|v| u8::try_from(v).ok())
                .ok_or(Error::AttachFailed)?;
        }
        Ok(Ipv4Addr::from(octets))
    }
}

/// Replace a command failure by the error of the step, keeping a power down
/// visible to [`Runner::run`].
fn unless_powered_down(err: Error, step: Error) -> Error {
    match err {
        Error::PoweredDown => err,
        _ => step,
    }
}
