//! Device and network queries of the GSM part of the module.

use embassy_time::Timer;
use embedded_io::ReadReady;
use embedded_io_async::{Read, Write};
use heapless::String;
use serde::Serialize;

use crate::asynch::runner::Runner;
use crate::command::Expectation;
use crate::config::CellularConfig;
use crate::error::Error;
use crate::registration::SignalQuality;

/// `+CBC: <bcs>,<bcl>,<voltage>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BatteryStatus {
    /// 0 not charging, 1 charging, 2 charging finished
    pub status: u8,
    pub percent: u8,
    pub voltage_mv: u16,
}

/// Network time as reported by `+CCLK`, `yy/MM/dd`, `hh:mm:ss` and the zone
/// in quarters of an hour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Clock {
    pub date: String<8>,
    pub time: String<8>,
    pub tz: String<3>,
}

/// Cell based position from `+CIPGSMLOC`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Location {
    pub longitude: String<12>,
    pub latitude: String<12>,
    pub date: String<10>,
    pub time: String<8>,
}

fn copy<const N: usize>(s: &str) -> Result<String<N>, Error> {
    let mut out = String::new();
    out.push_str(s).map_err(|_| Error::Overflow)?;
    Ok(out)
}

fn narrow<V: TryFrom<i64>>(v: Option<i64>) -> Result<V, Error> {
    v.and_then(|v| V::try_from(v).ok()).ok_or(Error::Mismatch)
}

impl<T, C> Runner<T, C>
where
    T: Read + Write + ReadReady,
    C: CellularConfig,
{
    /// Enter the SIM PIN.
    pub async fn unlock(&mut self, pin: &str) -> Result<(), Error> {
        self.at.expect_ok_fmt(format_args!("AT+CPIN={}", pin)).await
    }

    /// Single token answer followed by `OK`, such as `AT+GSN`.
    async fn query_token<const N: usize>(&mut self, cmd: &str) -> Result<String<N>, Error> {
        let timeout = C::TIMING.command_timeout;
        let caps = self
            .at
            .send_and_await(cmd, &Expectation::Fields("%s"), timeout)
            .await?;
        let token = match caps.str(0) {
            Some("ERROR") | None => return Err(Error::Mismatch),
            Some(token) => copy(token)?,
        };
        self.at.await_ok().await?;
        Ok(token)
    }

    pub async fn imei(&mut self) -> Result<String<16>, Error> {
        self.query_token("AT+GSN").await
    }

    /// IMSI of the inserted SIM card.
    pub async fn cimi(&mut self) -> Result<String<16>, Error> {
        self.query_token("AT+CIMI").await
    }

    pub async fn battery(&mut self) -> Result<BatteryStatus, Error> {
        let timeout = C::TIMING.command_timeout;
        let caps = self
            .at
            .send_and_await("AT+CBC", &Expectation::Fields("+CBC: %d,%d,%d"), timeout)
            .await?;
        let battery = BatteryStatus {
            status: narrow(caps.int(0))?,
            percent: narrow(caps.int(1))?,
            voltage_mv: narrow(caps.int(2))?,
        };
        self.at.await_ok().await?;
        Ok(battery)
    }

    /// `+CADC: <status>,<value>`, the value in mV.
    pub async fn adc(&mut self) -> Result<u16, Error> {
        let timeout = C::TIMING.command_timeout;
        let caps = self
            .at
            .send_and_await("AT+CADC?", &Expectation::Fields("+CADC: %d,%d"), timeout)
            .await?;
        if caps.int(0) != Some(1) {
            return Err(Error::Mismatch);
        }
        let value = narrow(caps.int(1))?;
        self.at.await_ok().await?;
        Ok(value)
    }

    pub async fn clock(&mut self) -> Result<Clock, Error> {
        let timeout = C::TIMING.command_timeout;
        let caps = self
            .at
            .send_and_await(
                "AT+CCLK?",
                &Expectation::Fields("+CCLK: \"%8s,%8s%3s\""),
                timeout,
            )
            .await?;
        let clock = Clock {
            date: copy(caps.str(0).unwrap_or_default())?,
            time: copy(caps.str(1).unwrap_or_default())?,
            tz: copy(caps.str(2).unwrap_or_default())?,
        };
        self.at.await_ok().await.ok();
        Ok(clock)
    }

    /// Ask the network for an approximate position. Needs an open bearer.
    pub async fn location(&mut self) -> Result<Location, Error> {
        let t = C::TIMING;
        self.at.send("AT+CIPGSMLOC=1,1").await?;
        Timer::after(t.location_settle).await;
        let caps = self
            .at
            .await_match(&Expectation::Fields("+CIPGSMLOC: %d,%s"), t.location_timeout)
            .await?;

        if caps.int(0) != Some(0) {
            debug!("Location lookup failed with {:?}", caps.int(0));
            return Err(Error::Mismatch);
        }
        let mut parts = caps.str(1).unwrap_or_default().split(',');
        let mut next = || parts.next().filter(|p| !p.is_empty()).ok_or(Error::Mismatch);
        let location = Location {
            longitude: copy(next()?)?,
            latitude: copy(next()?)?,
            date: copy(next()?)?,
            time: copy(next()?)?,
        };
        self.at.await_ok().await?;
        Ok(location)
    }

    /// `AT+CSQ`, read after the settle time the module needs to measure.
    pub async fn signal_quality(&mut self) -> Result<SignalQuality, Error> {
        let t = C::TIMING;
        self.at.send("AT+CSQ").await?;
        Timer::after(t.signal_settle).await;
        let caps = self
            .at
            .await_match(&Expectation::Fields("+CSQ: %d,%d"), t.command_timeout)
            .await?;
        let quality = SignalQuality {
            rssi: narrow(caps.int(0))?,
            ber: narrow(caps.int(1))?,
        };
        self.at.await_ok().await.ok();
        Ok(quality)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{cmd, MockTransport, TestConfig};

    fn runner(transport: MockTransport) -> Runner<MockTransport, TestConfig> {
        Runner::new(transport, TestConfig::default())
    }

    #[tokio::test]
    async fn identity_queries() {
        let (transport, handle) = MockTransport::new([
            cmd("AT+CPIN=1234", "OK\r\n"),
            cmd("AT+GSN", "\r\n866262037145531\r\n\r\nOK\r\n"),
            cmd("AT+CIMI", "ERROR\r\n"),
        ]);
        let mut runner = runner(transport);

        runner.unlock("1234").await.unwrap();
        assert_eq!(runner.imei().await.unwrap().as_str(), "866262037145531");
        assert_eq!(runner.cimi().await, Err(Error::Mismatch));
        assert_eq!(handle.remaining(), 0);
    }

    #[tokio::test]
    async fn battery_and_clock() {
        let (transport, _handle) = MockTransport::new([
            cmd("AT+CBC", "+CBC: 1,64,3905\r\n\r\nOK\r\n"),
            cmd("AT+CCLK?", "+CCLK: \"26/10/16,09:41:07+12\"\r\n\r\nOK\r\n"),
        ]);
        let mut runner = runner(transport);

        assert_eq!(
            runner.battery().await,
            Ok(BatteryStatus {
                status: 1,
                percent: 64,
                voltage_mv: 3905
            })
        );
        let clock = runner.clock().await.unwrap();
        assert_eq!(clock.date.as_str(), "26/10/16");
        assert_eq!(clock.time.as_str(), "09:41:07");
        assert_eq!(clock.tz.as_str(), "+12");
    }

    #[tokio::test]
    async fn location_is_split() {
        let (transport, _handle) = MockTransport::new([
            cmd(
                "AT+CIPGSMLOC=1,1",
                "+CIPGSMLOC: 0,37.617633,55.755786,2026/10/16,09:41:07\r\n\r\nOK\r\n",
            ),
            cmd("AT+CIPGSMLOC=1,1", "+CIPGSMLOC: 601\r\n"),
        ]);
        let mut runner = runner(transport);

        let location = runner.location().await.unwrap();
        assert_eq!(location.longitude.as_str(), "37.617633");
        assert_eq!(location.latitude.as_str(), "55.755786");
        assert_eq!(location.date.as_str(), "2026/10/16");
        assert_eq!(location.time.as_str(), "09:41:07");

        assert_eq!(runner.location().await, Err(Error::Mismatch));
    }

    #[tokio::test]
    async fn signal_quality_rejects_partial_answer() {
        let (transport, _handle) = MockTransport::new([
            cmd("AT+CSQ", "+CSQ: 15\r\n"),
            cmd("AT+CSQ", "+CSQ: 99,99\r\n\r\nOK\r\n"),
        ]);
        let mut runner = runner(transport);

        assert_eq!(runner.signal_quality().await, Err(Error::Mismatch));
        let quality = runner.signal_quality().await.unwrap();
        assert!(!quality.in_range());
    }
}
