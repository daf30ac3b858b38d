use core::fmt;

use embassy_time::Timer;
use embedded_io::ReadReady;
use embedded_io_async::{Read, Write};

use super::RX_CHUNK;
use crate::apn::OperatorProfile;
use crate::command::{AtClient, Expectation, OK};
use crate::error::Error;

/// The state of the modelled TCP connection.
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    #[default]
    Closed,
    Connecting,
    Connected,
    Sending,
    Error,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            State::Closed => write!(f, "CLOSED"),
            State::Connecting => write!(f, "CONNECTING"),
            State::Connected => write!(f, "CONNECTED"),
            State::Sending => write!(f, "SENDING"),
            State::Error => write!(f, "ERROR"),
        }
    }
}

/// Outcome of [`TcpSocket::send`].
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SendStatus {
    /// Bytes the module confirmed with `DATA ACCEPT`. `0` if no
    /// confirmation arrived in time.
    pub accepted: usize,
    pub requested: usize,
}

impl SendStatus {
    pub fn complete(&self) -> bool {
        self.accepted == self.requested
    }
}

/// Connection `0` of the module.
///
/// Borrows the AT channel for as long as it lives, so no other command can
/// be interleaved with a transfer.
pub struct TcpSocket<'a, T> {
    at: &'a mut AtClient<T>,
    profile: Option<OperatorProfile>,
    state: State,
}

impl<'a, T> TcpSocket<'a, T>
where
    T: Read + Write + ReadReady,
{
    pub fn new(at: &'a mut AtClient<T>, profile: Option<OperatorProfile>) -> Self {
        Self {
            at,
            profile,
            state: State::Closed,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Bring the IP context up and open a connection to `host:port`.
    ///
    /// The local address is polled up to `attempts` times before giving up.
    pub async fn connect(&mut self, host: &str, port: u16, attempts: u32) -> Result<(), Error> {
        self.state = State::Connecting;
        match self.open(host, port, attempts).await {
            Ok(()) => {
                info!("Connected to {}:{}", host, port);
                self.state = State::Connected;
                Ok(())
            }
            Err(e) => {
                warn!("Connecting to {}:{} failed: {:?}", host, port, e);
                self.state = State::Error;
                Err(e)
            }
        }
    }

    async fn open(&mut self, host: &str, port: u16, attempts: u32) -> Result<(), Error> {
        let t = *self.at.timing();
        self.at
            .send_and_await("AT+CIPSHUT", &Expectation::Literal("SHUT OK"), t.shut_timeout)
            .await?;
        self.at.expect_ok("AT+CIPMUX=1").await.ok();
        self.at.expect_ok("AT+CIPRXGET=1").await.ok();
        self.at.expect_ok("AT+CMEE=2").await?;
        self.at.expect_ok("AT+CIPQSEND=1").await?;

        match self.profile {
            Some(OperatorProfile {
                apn,
                user: Some(user),
                password: Some(password),
                ..
            }) => {
                self.at
                    .expect_ok_fmt(format_args!(
                        "AT+CSTT=\"{}\",\"{}\",\"{}\"",
                        apn, user, password
                    ))
                    .await?
            }
            Some(OperatorProfile { apn, .. }) => {
                self.at
                    .expect_ok_fmt(format_args!("AT+CSTT=\"{}\"", apn))
                    .await?
            }
            None => warn!("No operator profile, using the module's APN"),
        }
        self.at
            .send_and_await("AT+CIICR", &OK, t.bearer_timeout)
            .await?;

        let mut has_ip = false;
        for _ in 0..attempts.max(1) {
            if let Ok(caps) = self
                .at
                .send_and_await("AT+CIFSR", &Expectation::Fields("%s"), t.command_timeout)
                .await
            {
                if caps.str(0) != Some("ERROR") {
                    debug!("Local address {:?}", caps.str(0));
                    has_ip = true;
                    break;
                }
            }
            Timer::after(t.poll_interval).await;
        }
        if !has_ip {
            return Err(Error::AttachFailed);
        }

        self.at
            .expect_ok_fmt(format_args!(
                "AT+CIPSTART=0,\"TCP\",\"{}\",\"{}\"",
                host, port
            ))
            .await?;
        self.at
            .await_match(
                &Expectation::Literal("0, CONNECT OK"),
                t.tcp_connect_timeout,
            )
            .await
            .map(drop)
    }

    /// Ask the module whether connection `0` is up.
    pub async fn status(&mut self) -> Result<bool, Error> {
        let timeout = self.at.timing().command_timeout;
        let caps = self
            .at
            .send_and_await(
                "AT+CIPSTATUS=0",
                &Expectation::Fields("+CIPSTATUS: %s"),
                timeout,
            )
            .await?;
        let connected = caps
            .str(0)
            .is_some_and(|status| status.contains("\"CONNECTED\""));
        self.at.await_ok().await?;

        self.state = match (connected, self.state) {
            (true, _) => State::Connected,
            (false, State::Connected) => State::Closed,
            (false, state) => state,
        };
        Ok(connected)
    }

    /// Close connection `0`. The socket counts as closed afterwards even if
    /// the module did not confirm.
    pub async fn disconnect(&mut self) -> Result<(), Error> {
        let timeout = self.at.timing().command_timeout;
        self.state = State::Closed;
        self.at
            .send_and_await(
                "AT+CIPCLOSE=0",
                &Expectation::Literal("0, CLOSE OK"),
                timeout,
            )
            .await
            .map(drop)
    }

    /// Send `data` in one `AT+CIPSEND` transfer.
    ///
    /// A missing or short `DATA ACCEPT` is not an error: the module buffers
    /// generously, so the caller decides from [`SendStatus`] whether to
    /// resend.
    pub async fn send(&mut self, data: &[u8]) -> Result<SendStatus, Error> {
        let t = *self.at.timing();
        self.state = State::Sending;

        if let Err(e) = self.announce(data.len()).await {
            self.state = State::Error;
            return Err(e);
        }

        if let Err(e) = self.at.write_raw(data).await {
            self.state = State::Error;
            return Err(e);
        }
        let accepted = match self
            .at
            .await_match(
                &Expectation::Fields("DATA ACCEPT: 0,%d"),
                t.send_accept_timeout,
            )
            .await
        {
            Ok(caps) => caps
                .int(0)
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or(0),
            Err(e) => {
                debug!("No send confirmation: {:?}", e);
                0
            }
        };
        self.state = State::Connected;

        let status = SendStatus {
            accepted,
            requested: data.len(),
        };
        if !status.complete() {
            warn!("Module accepted {} of {} bytes", accepted, data.len());
        }
        Ok(status)
    }

    async fn announce(&mut self, len: usize) -> Result<(), Error> {
        let timeout = self.at.timing().command_timeout;
        self.at
            .send_fmt(format_args!("AT+CIPSEND=0,{}", len))
            .await?;
        self.at.await_prompt(b'>', timeout).await
    }

    /// Read up to `size` bytes into `buf`.
    ///
    /// Data is requested in chunks of at most [`RX_CHUNK`] bytes until
    /// `size` bytes arrived or a request fails; a failed request just ends
    /// the transfer. The module may confirm more than requested, so the
    /// count can exceed `size`, never `buf.len()`. Bytes that do not fit
    /// `buf` are dropped.
    pub async fn receive(&mut self, buf: &mut [u8], size: usize) -> Result<usize, Error> {
        let timeout = self.at.timing().command_timeout;
        let mut actual = 0;

        while actual < size && actual < buf.len() {
            let chunk = (size - actual).min(RX_CHUNK);
            self.at
                .send_fmt(format_args!("AT+CIPRXGET=2,0,{}", chunk))
                .await?;
            let confirmed = match self
                .at
                .await_match(&Expectation::Fields("+CIPRXGET: 2,%*d,%d,%d"), timeout)
                .await
            {
                Ok(caps) => caps
                    .int(1)
                    .and_then(|n| usize::try_from(n).ok())
                    .unwrap_or(0),
                Err(e) => {
                    debug!("Receive ended after {} bytes: {:?}", actual, e);
                    break;
                }
            };
            if confirmed == 0 {
                break;
            }

            let take = confirmed.min(buf.len() - actual);
            if let Err(e) = self.at.read_raw(&mut buf[actual..actual + take]).await {
                warn!("Payload cut short: {:?}", e);
                break;
            }
            actual += take;

            if confirmed > take {
                warn!("Dropping {} bytes that do not fit", confirmed - take);
                if self.at.skip_raw(confirmed - take).await.is_err() {
                    break;
                }
            }
            self.at.await_ok().await.ok();
        }

        trace!("Received {} bytes", actual);
        Ok(actual)
    }
}
