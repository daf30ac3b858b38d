//! Line framing on top of a polled byte transport.

use embassy_time::{Duration, Instant, Timer};
use embedded_io::ReadReady;
use embedded_io_async::{Read, Write};
use heapless::Vec;

use crate::error::Error;
use crate::fmt::LossyStr;

/// Capacity of a single response line. Longer lines are truncated.
pub const LINE_CAPACITY: usize = 64;

/// A single line received from the modem, without `\r` and `\n`.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ResponseLine {
    buf: Vec<u8, LINE_CAPACITY>,
    terminated: bool,
    truncated: bool,
}

impl ResponseLine {
    pub const fn new() -> Self {
        Self {
            buf: Vec::new(),
            terminated: false,
            truncated: false,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn as_str(&self) -> Option<&str> {
        core::str::from_utf8(&self.buf).ok()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// `false` if the deadline expired before a `\n` arrived.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// `true` if bytes were dropped because the line exceeded
    /// [`LINE_CAPACITY`].
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    fn push(&mut self, byte: u8) {
        if self.buf.push(byte).is_err() {
            self.truncated = true;
        }
    }
}

impl From<&[u8]> for ResponseLine {
    fn from(bytes: &[u8]) -> Self {
        let mut line = Self::new();
        bytes.iter().for_each(|b| line.push(*b));
        line.terminated = true;
        line
    }
}

impl From<&str> for ResponseLine {
    fn from(s: &str) -> Self {
        Self::from(s.as_bytes())
    }
}

impl core::fmt::Debug for ResponseLine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        LossyStr(&self.buf).fmt(f)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ResponseLine {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "{:?}", LossyStr(&self.buf))
    }
}

/// Owns the serial transport and turns its byte stream into response lines.
///
/// The transport is only ever read when it reports bytes as ready; between
/// two polls the reader sleeps for `poll_interval`, yielding to the
/// executor.
pub struct LineReader<T> {
    transport: T,
    poll_interval: Duration,
}

impl<T> LineReader<T>
where
    T: Read + Write + ReadReady,
{
    pub fn new(transport: T, poll_interval: Duration) -> Self {
        Self {
            transport,
            poll_interval,
        }
    }

    pub fn byte_ready(&mut self) -> Result<bool, Error> {
        self.transport.read_ready().map_err(|_| Error::Io)
    }

    async fn read_byte(&mut self) -> Result<u8, Error> {
        let mut byte = [0u8; 1];
        match self.transport.read(&mut byte).await {
            Ok(1) => Ok(byte[0]),
            _ => Err(Error::Io),
        }
    }

    /// Read one line, or whatever arrived of it before `deadline`.
    ///
    /// Blank lines are skipped. A line that did not see its `\n` in time is
    /// returned with `is_terminated() == false`, possibly empty.
    pub async fn read_line(&mut self, deadline: Instant) -> Result<ResponseLine, Error> {
        let mut line = ResponseLine::new();
        loop {
            while self.byte_ready()? {
                match self.read_byte().await? {
                    b'\r' => {}
                    b'\n' if line.is_empty() => {}
                    b'\n' => {
                        line.terminated = true;
                        return Ok(line);
                    }
                    b => line.push(b),
                }
            }
            if Instant::now() >= deadline {
                return Ok(line);
            }
            Timer::after(self.poll_interval).await;
        }
    }

    /// Drop everything the transport has ready, waiting one poll interval
    /// after each byte so an echo still trickling in at line speed is taken
    /// as a whole.
    pub async fn discard_echo(&mut self) -> Result<usize, Error> {
        let mut dropped = 0;
        while self.byte_ready()? {
            self.read_byte().await?;
            dropped += 1;
            Timer::after(self.poll_interval).await;
        }
        if dropped > 0 {
            trace!("Discarded {} echoed bytes", dropped);
        }
        Ok(dropped)
    }

    /// Wait for a single prompt byte such as `>` that is not followed by a
    /// line terminator. Anything ready right after the prompt is discarded.
    pub async fn await_byte(&mut self, prompt: u8, deadline: Instant) -> Result<(), Error> {
        loop {
            while self.byte_ready()? {
                if self.read_byte().await? == prompt {
                    self.discard_echo().await?;
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout);
            }
            Timer::after(self.poll_interval).await;
        }
    }

    /// Fill `buf` with raw payload bytes, bypassing line framing.
    pub async fn read_exact(&mut self, buf: &mut [u8], deadline: Instant) -> Result<(), Error> {
        let mut filled = 0;
        while filled < buf.len() {
            if self.byte_ready()? {
                match self.transport.read(&mut buf[filled..]).await {
                    Ok(0) | Err(_) => return Err(Error::Io),
                    Ok(n) => filled += n,
                }
                continue;
            }
            if Instant::now() >= deadline {
                debug!("Raw read timed out after {}/{} bytes", filled, buf.len());
                return Err(Error::Timeout);
            }
            Timer::after(self.poll_interval).await;
        }
        Ok(())
    }

    /// Consume and drop `len` raw payload bytes.
    pub async fn skip(&mut self, mut len: usize, deadline: Instant) -> Result<(), Error> {
        let mut scratch = [0u8; 32];
        while len > 0 {
            let n = len.min(scratch.len());
            self.read_exact(&mut scratch[..n], deadline).await?;
            len -= n;
        }
        Ok(())
    }

    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.transport.write_all(bytes).await.map_err(|_| Error::Io)?;
        self.transport.flush().await.map_err(|_| Error::Io)
    }
}
