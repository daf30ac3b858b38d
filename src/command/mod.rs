//! AT command engine of the SIM800 series.
//!
//! One command is in flight at a time: [`AtClient::send`] writes a command
//! line and swallows the echo, [`AtClient::await_match`] reads the next
//! response line that is not an unsolicited notification and matches it
//! against an [`Expectation`]. Failures are always returned to the caller,
//! the engine itself never retries.

pub mod expect;
pub mod line;
pub mod urc;

use core::fmt::Write as _;

use embassy_time::{Duration, Instant};
use embedded_io::ReadReady;
use embedded_io_async::{Read, Write};
use heapless::String;

pub use expect::{Captures, Expectation, OK};
pub use line::{LineReader, ResponseLine};
pub use urc::Urc;

use crate::config::Timing;
use crate::error::Error;

/// Largest command line, including the trailing `\r\n`.
pub const COMMAND_CAPACITY: usize = 256;

/// Lines read per [`AtClient::await_match`] before giving up on
/// notifications. The last one is matched whatever it is.
pub const MAX_RESPONSE_LINES: usize = 6;

pub struct AtClient<T> {
    reader: LineReader<T>,
    timing: Timing,
    last_urc: Option<Urc>,
}

impl<T> AtClient<T>
where
    T: Read + Write + ReadReady,
{
    pub fn new(transport: T, timing: Timing) -> Self {
        Self {
            reader: LineReader::new(transport, timing.poll_interval),
            timing,
            last_urc: None,
        }
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    /// The most recent notification skipped while waiting for a response.
    pub fn last_urc(&self) -> Option<Urc> {
        self.last_urc
    }

    pub fn reader(&mut self) -> &mut LineReader<T> {
        &mut self.reader
    }

    /// Write `cmd`, drop its echo, then terminate it with `\r\n`.
    ///
    /// The module only acts on the command once the terminator arrives, so
    /// nothing but the echo can be pending while it is drained.
    pub async fn send(&mut self, cmd: &str) -> Result<(), Error> {
        self.send_fmt(format_args!("{}", cmd)).await
    }

    /// Like [`send`](Self::send), formatting the command in place.
    pub async fn send_fmt(&mut self, args: core::fmt::Arguments<'_>) -> Result<(), Error> {
        let mut cmd: String<COMMAND_CAPACITY> = String::new();
        cmd.write_fmt(args).map_err(|_| Error::Overflow)?;
        if cmd.len() + 2 > COMMAND_CAPACITY {
            return Err(Error::Overflow);
        }
        trace!("+++ {}", cmd.as_str());
        self.reader.write_all(cmd.as_bytes()).await?;
        self.reader.discard_echo().await?;
        self.reader.write_all(b"\r\n").await
    }

    /// Write raw payload bytes, bypassing line framing.
    pub async fn write_raw(&mut self, data: &[u8]) -> Result<(), Error> {
        trace!("+++ <{} raw bytes>", data.len());
        self.reader.write_all(data).await
    }

    /// Read the response to the command in flight and match it.
    ///
    /// Up to [`MAX_RESPONSE_LINES`] lines are read before `timeout` expires;
    /// notifications among the first five are skipped. A power down
    /// announcement ends the wait with [`Error::PoweredDown`]. A line cut short by
    /// the deadline is still matched, which is how prompts without a line
    /// terminator are picked up.
    pub async fn await_match(
        &mut self,
        expectation: &Expectation<'_>,
        timeout: Duration,
    ) -> Result<Captures, Error> {
        let deadline = Instant::now() + timeout;
        let mut read = 0;
        loop {
            let line = self.reader.read_line(deadline).await?;
            read += 1;
            if line.is_empty() {
                trace!("--- <timeout>");
                return Err(Error::Timeout);
            }
            trace!("--- {:?}", line);

            if read < MAX_RESPONSE_LINES {
                if let Some(urc) = urc::classify(line.as_bytes()) {
                    self.last_urc = Some(urc);
                    if urc.is_power_down() {
                        warn!("Module reported {:?}", urc);
                        return Err(Error::PoweredDown);
                    }
                    debug!("Skipping URC {:?}", urc);
                    continue;
                }
            }

            return expectation.matches(line);
        }
    }

    pub async fn send_and_await(
        &mut self,
        cmd: &str,
        expectation: &Expectation<'_>,
        timeout: Duration,
    ) -> Result<Captures, Error> {
        self.send(cmd).await?;
        self.await_match(expectation, timeout).await
    }

    /// `cmd` answered by `OK` within the default command timeout.
    pub async fn expect_ok(&mut self, cmd: &str) -> Result<(), Error> {
        let timeout = self.timing.command_timeout;
        self.send_and_await(cmd, &OK, timeout).await.map(drop)
    }

    /// Formatted variant of [`expect_ok`](Self::expect_ok).
    pub async fn expect_ok_fmt(&mut self, args: core::fmt::Arguments<'_>) -> Result<(), Error> {
        self.send_fmt(args).await?;
        let timeout = self.timing.command_timeout;
        self.await_match(&OK, timeout).await.map(drop)
    }

    /// Wait for a bare `OK` within the default command timeout.
    pub async fn await_ok(&mut self) -> Result<(), Error> {
        let timeout = self.timing.command_timeout;
        self.await_match(&OK, timeout).await.map(drop)
    }

    /// Send `cmd` and wait for `OK`, sending it a second time if the first
    /// attempt fails.
    pub async fn expect_ok_retry(&mut self, cmd: &str) -> Result<(), Error> {
        match self.expect_ok(cmd).await {
            Ok(()) => Ok(()),
            Err(e) => {
                debug!("{} failed with {:?}, retrying once", cmd, e);
                self.expect_ok(cmd).await
            }
        }
    }

    /// Wait for a prompt byte such as `>` or the `DOWNLOAD` cue's first byte.
    pub async fn await_prompt(&mut self, prompt: u8, timeout: Duration) -> Result<(), Error> {
        self.reader.await_byte(prompt, Instant::now() + timeout).await
    }

    /// Read exactly `buf.len()` raw payload bytes.
    pub async fn read_raw(&mut self, buf: &mut [u8]) -> Result<(), Error> {
        let deadline = Instant::now() + self.timing.raw_read_timeout;
        self.reader.read_exact(buf, deadline).await
    }

    /// Consume `len` raw payload bytes that do not fit the caller's buffer.
    pub async fn skip_raw(&mut self, len: usize) -> Result<(), Error> {
        let deadline = Instant::now() + self.timing.raw_read_timeout;
        self.reader.skip(len, deadline).await
    }
}
