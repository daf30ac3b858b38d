//! Scripted modem for unit tests.
//!
//! A [`MockTransport`] plays back a script of [`Step`]s: each step waits for
//! a complete command line (or a number of raw bytes) from the driver, checks
//! it and queues the modem's reply. Replies only become readable after one
//! poll that reports nothing ready, so the driver's echo discard never eats
//! into the response.

extern crate std;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::string::String;
use std::sync::Once;
use std::vec::Vec;

use embassy_time::Duration;

use crate::asynch::pwr::ChipPower;
use crate::config::{CellularConfig, Timing};

static INIT: Once = Once::new();

pub fn init_logger() {
    INIT.call_once(|| {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .is_test(true)
            .init();
    });
}

pub const TEST_TIMING: Timing = Timing {
    poll_interval: Duration::from_millis(1),
    command_timeout: Duration::from_millis(30),
    alive_timeout: Duration::from_millis(10),
    reboot_wait: Duration::from_millis(1),
    reset_settle: Duration::from_millis(1),
    reset_timeout: Duration::from_millis(20),
    wake_retry: Duration::from_millis(1),
    sim_timeout: Duration::from_millis(20),
    sim_retry: Duration::from_millis(1),
    signal_settle: Duration::from_millis(1),
    signal_retry: Duration::from_millis(1),
    registration_timeout: Duration::from_millis(40),
    registration_poll: Duration::from_millis(1),
    registration_backoff: Duration::from_millis(1),
    operator_timeout: Duration::from_millis(20),
    bearer_timeout: Duration::from_millis(30),
    ip_settle: Duration::from_millis(1),
    attach_retry: Duration::from_millis(1),
    shut_timeout: Duration::from_millis(20),
    tcp_connect_timeout: Duration::from_millis(30),
    send_accept_timeout: Duration::from_millis(20),
    raw_read_timeout: Duration::from_millis(20),
    http_term_settle: Duration::from_millis(1),
    http_action_timeout: Duration::from_millis(30),
    http_upload_timeout: Duration::from_millis(20),
    http_post_poll: Duration::from_millis(5),
    location_settle: Duration::from_millis(1),
    location_timeout: Duration::from_millis(20),
};

pub fn test_timing() -> Timing {
    TEST_TIMING
}

/// One exchange with the scripted modem.
#[derive(Debug)]
pub enum Step {
    /// A command line starting with `prefix`, answered with `reply`.
    Cmd { prefix: String, reply: Vec<u8> },
    /// `len` raw payload bytes, answered with `reply`.
    Raw { len: usize, reply: Vec<u8> },
}

pub fn cmd(prefix: &str, reply: impl AsRef<[u8]>) -> Step {
    Step::Cmd {
        prefix: prefix.into(),
        reply: reply.as_ref().to_vec(),
    }
}

pub fn raw(len: usize, reply: impl AsRef<[u8]>) -> Step {
    Step::Raw {
        len,
        reply: reply.as_ref().to_vec(),
    }
}

#[derive(Default)]
struct MockState {
    script: VecDeque<Step>,
    rx: VecDeque<u8>,
    pending: VecDeque<u8>,
    written: Vec<u8>,
    lines: Vec<String>,
    raw_writes: Vec<Vec<u8>>,
    echo: bool,
}

impl MockState {
    fn on_write(&mut self) {
        loop {
            match self.script.front() {
                Some(Step::Raw { len, .. }) if self.written.len() >= *len => {
                    let Some(Step::Raw { len, reply }) = self.script.pop_front() else {
                        unreachable!()
                    };
                    let payload: Vec<u8> = self.written.drain(..len).collect();
                    self.raw_writes.push(payload);
                    self.reply(&reply);
                }
                Some(Step::Raw { .. }) => return,
                _ => {
                    let Some(end) = self.written.windows(2).position(|w| w == b"\r\n") else {
                        return;
                    };
                    let line: Vec<u8> = self.written.drain(..end + 2).collect();
                    let line = String::from_utf8_lossy(&line[..end]).into_owned();
                    match self.script.pop_front() {
                        Some(Step::Cmd { prefix, reply }) => {
                            assert!(
                                line.starts_with(prefix.as_str()),
                                "expected command starting with {:?}, got {:?}",
                                prefix,
                                line
                            );
                            self.lines.push(line);
                            self.reply(&reply);
                        }
                        _ => self.lines.push(line),
                    }
                }
            }
        }
    }

    fn reply(&mut self, reply: &[u8]) {
        let stale: Vec<u8> = self.pending.drain(..).collect();
        self.rx.extend(stale);
        self.pending.extend(reply);
    }
}

/// Serial transport backed by a script.
pub struct MockTransport {
    state: Rc<RefCell<MockState>>,
}

/// Test side of a [`MockTransport`].
#[derive(Clone)]
pub struct MockHandle {
    state: Rc<RefCell<MockState>>,
}

impl MockTransport {
    pub fn new(script: impl IntoIterator<Item = Step>) -> (Self, MockHandle) {
        let state = Rc::new(RefCell::new(MockState {
            script: script.into_iter().collect(),
            ..Default::default()
        }));
        (
            Self {
                state: state.clone(),
            },
            MockHandle { state },
        )
    }
}

impl MockHandle {
    /// Make `bytes` readable right away.
    pub fn push_rx(&self, bytes: &[u8]) {
        self.state.borrow_mut().rx.extend(bytes);
    }

    /// Make `bytes` readable after the next empty poll.
    pub fn push_pending(&self, bytes: &[u8]) {
        self.state.borrow_mut().pending.extend(bytes);
    }

    /// Echo every written byte straight back, as the module does before
    /// `ATE0`.
    pub fn set_echo(&self, echo: bool) {
        self.state.borrow_mut().echo = echo;
    }

    /// Command lines written so far, without `\r\n`.
    pub fn lines(&self) -> Vec<String> {
        self.state.borrow().lines.clone()
    }

    pub fn raw_writes(&self) -> Vec<Vec<u8>> {
        self.state.borrow().raw_writes.clone()
    }

    /// Steps of the script not consumed yet.
    pub fn remaining(&self) -> usize {
        self.state.borrow().script.len()
    }
}

impl embedded_io::ErrorType for MockTransport {
    type Error = core::convert::Infallible;
}

impl embedded_io::ReadReady for MockTransport {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        let mut state = self.state.borrow_mut();
        if !state.rx.is_empty() {
            return Ok(true);
        }
        let pending: Vec<u8> = state.pending.drain(..).collect();
        state.rx.extend(pending);
        Ok(false)
    }
}

impl embedded_io_async::Read for MockTransport {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut state = self.state.borrow_mut();
        let mut n = 0;
        while n < buf.len() {
            let Some(b) = state.rx.pop_front() else {
                break;
            };
            buf[n] = b;
            n += 1;
        }
        Ok(n)
    }
}

impl embedded_io_async::Write for MockTransport {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        let mut state = self.state.borrow_mut();
        if state.echo {
            state.rx.extend(buf);
        }
        state.written.extend_from_slice(buf);
        state.on_write();
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Power switch that records every request.
#[derive(Clone, Default)]
pub struct MockPower {
    calls: Rc<RefCell<Vec<bool>>>,
}

impl MockPower {
    pub fn calls(&self) -> Vec<bool> {
        self.calls.borrow().clone()
    }
}

impl ChipPower for MockPower {
    async fn chip_power(&mut self, on: bool) -> bool {
        self.calls.borrow_mut().push(on);
        true
    }
}

#[derive(Clone, Default)]
pub struct TestConfig {
    pub power: MockPower,
}

impl CellularConfig for TestConfig {
    type Power = MockPower;

    const TIMING: Timing = TEST_TIMING;

    fn power(&mut self) -> &mut Self::Power {
        &mut self.power
    }
}

/// Script of a fresh HTTP session for `url`, as set up before every action.
pub fn http_session(url: &str) -> Vec<Step> {
    std::vec![
        cmd("AT+HTTPTERM", "ERROR\r\n"),
        cmd("AT+HTTPINIT", "OK\r\n"),
        cmd("AT+HTTPPARA=\"CID\",1", "OK\r\n"),
        cmd(&std::format!("AT+HTTPPARA=\"URL\",\"{}\"", url), "OK\r\n"),
    ]
}

/// `+HTTPREAD` answer carrying `data`.
pub fn http_slice(data: &[u8]) -> Vec<u8> {
    let mut reply = std::format!("+HTTPREAD: {}\r\n", data.len()).into_bytes();
    reply.extend_from_slice(data);
    reply.extend_from_slice(b"\r\nOK\r\n");
    reply
}
