//! HTTP client of the module's built-in stack (`AT+HTTP*`).
//!
//! Requests run over bearer profile 1, which must be open. Bodies are never
//! held in full: responses are read back in slices with
//! `AT+HTTPREAD=<offset>,<len>` and uploads are written straight to the
//! transport after the `DOWNLOAD` cue.

use embassy_time::Timer;
use embedded_io::ReadReady;
use embedded_io_async::{Read, Write};
use serde::Serialize;

use crate::command::{AtClient, Expectation};
use crate::error::Error;

/// Largest `+HTTPREAD` slice the module may announce. Anything larger is
/// taken as a corrupted length and aborts the request.
pub const HTTP_READ_CEILING: usize = 102_400;

/// Slice size used when streaming a body.
pub const STREAM_CHUNK: usize = 64;

/// `+HTTPACTION` polls of a POST before giving up.
pub const POST_ACTION_POLLS: usize = 24;

/// Upload window announced with `AT+HTTPDATA`, in milliseconds.
const UPLOAD_WINDOW_MS: u32 = 3_000;
const STREAM_UPLOAD_WINDOW_MS: u32 = 120_000;

const FORM_CONTENT_TYPE: &str = "AT+HTTPPARA=\"CONTENT\",\"application/x-www-form-urlencoded\"";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Method {
    Get = 0,
    Post = 1,
}

/// One request and how far its body got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HttpTransaction<'u> {
    pub url: &'u str,
    pub method: Method,
    pub status: u16,
    /// Length of the response body as announced by `+HTTPACTION`.
    pub content_length: usize,
    /// Body bytes moved so far: read for a GET, uploaded for a POST.
    pub transferred: usize,
}

impl HttpTransaction<'_> {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Receiver of a response body read by [`HttpClient::read_body`].
pub trait BodySink {
    async fn accept(&mut self, data: &[u8]) -> Result<(), Error>;
}

struct WriteSink<'w, W>(&'w mut W);

impl<W: Write> BodySink for WriteSink<'_, W> {
    async fn accept(&mut self, data: &[u8]) -> Result<(), Error> {
        self.0.write_all(data).await.map_err(|_| Error::Io)
    }
}

pub struct HttpClient<'a, T> {
    at: &'a mut AtClient<T>,
    read_ceiling: usize,
}

impl<'a, T> HttpClient<'a, T>
where
    T: Read + Write + ReadReady,
{
    pub fn new(at: &'a mut AtClient<T>, read_ceiling: usize) -> Self {
        Self { at, read_ceiling }
    }

    /// Drop any previous session and set up a new one for `url`.
    async fn begin(&mut self, url: &str, form: bool) -> Result<(), Error> {
        self.term().await.ok();
        Timer::after(self.at.timing().http_term_settle).await;

        self.at.expect_ok("AT+HTTPINIT").await?;
        self.at.expect_ok("AT+HTTPPARA=\"CID\",1").await?;
        if form {
            self.at.expect_ok(FORM_CONTENT_TYPE).await?;
        }
        self.at
            .expect_ok_fmt(format_args!("AT+HTTPPARA=\"URL\",\"{}\"", url))
            .await
    }

    /// End the HTTP session.
    pub async fn term(&mut self) -> Result<(), Error> {
        self.at.expect_ok("AT+HTTPTERM").await
    }

    async fn action<'u>(
        &mut self,
        url: &'u str,
        method: Method,
        poll: usize,
    ) -> Result<HttpTransaction<'u>, Error> {
        let t = *self.at.timing();
        let (pattern, timeout) = match method {
            Method::Get => ("+HTTPACTION: 0,%d,%d", t.http_action_timeout),
            Method::Post => ("+HTTPACTION: 1,%d,%d", t.http_post_poll),
        };
        self.at
            .expect_ok_fmt(format_args!("AT+HTTPACTION={}", method as u8))
            .await?;

        let mut result = Err(Error::Timeout);
        for _ in 0..poll {
            result = self
                .at
                .await_match(&Expectation::Fields(pattern), timeout)
                .await;
            if result.is_ok() {
                break;
            }
        }
        let caps = result?;

        let tx = HttpTransaction {
            url,
            method,
            status: caps
                .int(0)
                .and_then(|v| u16::try_from(v).ok())
                .ok_or(Error::Mismatch)?,
            content_length: caps
                .int(1)
                .and_then(|v| usize::try_from(v).ok())
                .ok_or(Error::Mismatch)?,
            transferred: 0,
        };
        debug!(
            "HTTP {:?} {}: {} ({} bytes)",
            method, url, tx.status, tx.content_length
        );
        Ok(tx)
    }

    /// Issue a GET and wait for the status line. The body stays in the
    /// module and can be fetched with [`read`](Self::read).
    pub async fn get<'u>(&mut self, url: &'u str) -> Result<HttpTransaction<'u>, Error> {
        self.begin(url, false).await?;
        self.action(url, Method::Get, 1).await
    }

    /// Read the body slice starting at `offset` into `buf`.
    ///
    /// Returns the number of bytes stored, `0` past the end of the body.
    /// The module announcing more than the read ceiling fails the read
    /// with [`Error::Overflow`] before any payload is consumed.
    pub async fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<usize, Error> {
        let timeout = self.at.timing().command_timeout;
        self.at
            .send_fmt(format_args!("AT+HTTPREAD={},{}", offset, buf.len()))
            .await?;
        let caps = self
            .at
            .await_match(&Expectation::Fields("+HTTPREAD: %d"), timeout)
            .await?;
        let available = caps
            .int(0)
            .and_then(|v| usize::try_from(v).ok())
            .ok_or(Error::Mismatch)?;

        if available > self.read_ceiling {
            error!(
                "HTTPREAD announced {} bytes, ceiling is {}",
                available, self.read_ceiling
            );
            return Err(Error::Overflow);
        }

        let take = available.min(buf.len());
        self.at.read_raw(&mut buf[..take]).await?;
        if available > take {
            self.at.skip_raw(available - take).await?;
        }
        self.at.await_ok().await?;
        Ok(take)
    }

    /// Read the rest of the body of `tx` into `sink`, in slices of
    /// `chunk.len()` bytes, advancing `tx.transferred`.
    ///
    /// A body that ends early fails with [`Error::Truncated`].
    pub async fn read_body<B: BodySink>(
        &mut self,
        tx: &mut HttpTransaction<'_>,
        chunk: &mut [u8],
        sink: &mut B,
    ) -> Result<(), Error> {
        while tx.transferred < tx.content_length {
            let want = (tx.content_length - tx.transferred).min(chunk.len());
            let n = self.read(tx.transferred, &mut chunk[..want]).await?;
            if n == 0 {
                warn!(
                    "Body ended after {} of {} bytes",
                    tx.transferred, tx.content_length
                );
                return Err(Error::Truncated);
            }
            sink.accept(&chunk[..n]).await?;
            tx.transferred += n;
            trace!("Body {}/{}", tx.transferred, tx.content_length);
        }
        Ok(())
    }

    /// GET `url` and copy the whole body into `sink`.
    ///
    /// The transaction is returned with the number of bytes written.
    pub async fn get_stream<'u, W: Write>(
        &mut self,
        url: &'u str,
        sink: &mut W,
    ) -> Result<HttpTransaction<'u>, Error> {
        let mut tx = self.get(url).await?;
        let mut chunk = [0u8; STREAM_CHUNK];
        self.read_body(&mut tx, &mut chunk, &mut WriteSink(&mut *sink))
            .await?;
        sink.flush().await.map_err(|_| Error::Io)?;
        Ok(tx)
    }

    async fn upload_cue(&mut self, size: usize, window_ms: u32) -> Result<(), Error> {
        let timeout = self.at.timing().command_timeout;
        self.at
            .send_fmt(format_args!("AT+HTTPDATA={},{}", size, window_ms))
            .await?;
        self.at
            .await_match(&Expectation::Literal("DOWNLOAD"), timeout)
            .await
            .map(drop)
    }

    async fn finish_post<'u>(
        &mut self,
        url: &'u str,
        uploaded: usize,
    ) -> Result<HttpTransaction<'u>, Error> {
        let timeout = self.at.timing().http_upload_timeout;
        self.at.await_match(&crate::command::OK, timeout).await?;
        let mut tx = self.action(url, Method::Post, POST_ACTION_POLLS).await?;
        tx.transferred = uploaded;
        Ok(tx)
    }

    /// POST `body` as a form to `url`.
    pub async fn post<'u>(
        &mut self,
        url: &'u str,
        body: &[u8],
    ) -> Result<HttpTransaction<'u>, Error> {
        self.begin(url, true).await?;
        self.upload_cue(body.len(), UPLOAD_WINDOW_MS).await?;
        self.at.write_raw(body).await?;
        self.finish_post(url, body.len()).await
    }

    /// POST up to `size` bytes read from `source`.
    ///
    /// The end of `source` before `size` bytes is a normal end of the
    /// upload; the module then waits out the upload window.
    pub async fn post_stream<'u, R: Read>(
        &mut self,
        url: &'u str,
        source: &mut R,
        size: usize,
    ) -> Result<HttpTransaction<'u>, Error> {
        self.begin(url, false).await?;
        self.upload_cue(size, STREAM_UPLOAD_WINDOW_MS).await?;

        let mut chunk = [0u8; STREAM_CHUNK];
        let mut sent = 0;
        while sent < size {
            let want = (size - sent).min(STREAM_CHUNK);
            let n = source
                .read(&mut chunk[..want])
                .await
                .map_err(|_| Error::Io)?;
            if n == 0 {
                debug!("Upload source ended after {} of {} bytes", sent, size);
                break;
            }
            self.at.write_raw(&chunk[..n]).await?;
            sent += n;
        }

        self.finish_post(url, sent).await
    }
}
