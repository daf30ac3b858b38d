use embassy_time::Timer;
use embedded_io::ReadReady;
use embedded_io_async::{Read, Write};

use crate::asynch::runner::Runner;
use crate::command::{Expectation, OK};
use crate::config::CellularConfig;
use crate::error::Error;

impl<T, C> Runner<T, C>
where
    T: Read + Write + ReadReady,
    C: CellularConfig,
{
    /// Write the active operator profile into bearer profile 1.
    pub(crate) async fn configure_bearer(&mut self) -> Result<(), Error> {
        let timeout = C::TIMING.bearer_timeout;
        self.at
            .send_and_await("AT+SAPBR=3,1,\"CONTYPE\",\"GPRS\"", &OK, timeout)
            .await?;

        let Some(profile) = self.profile().copied() else {
            warn!("No operator profile, leaving APN unset");
            return Ok(());
        };
        self.at
            .expect_ok_fmt(format_args!("AT+SAPBR=3,1,\"APN\",\"{}\"", profile.apn))
            .await?;
        if let Some(user) = profile.user {
            self.at
                .expect_ok_fmt(format_args!("AT+SAPBR=3,1,\"USER\",\"{}\"", user))
                .await?;
        }
        if let Some(password) = profile.password {
            self.at
                .expect_ok_fmt(format_args!("AT+SAPBR=3,1,\"PWD\",\"{}\"", password))
                .await?;
        }
        Ok(())
    }

    /// Attach to GPRS and open bearer profile 1, making up to `attempts`
    /// tries for the attach and for its confirmation.
    pub async fn enable_gprs(&mut self, attempts: u32) -> Result<(), Error> {
        let t = C::TIMING;
        self.at
            .send_and_await("AT+CIPSHUT", &Expectation::Literal("SHUT OK"), t.shut_timeout)
            .await
            .ok();
        self.at.expect_ok("AT+CIPMUX=1").await.ok();
        self.at.expect_ok("AT+CIPRXGET=1").await.ok();

        let mut attached = false;
        for _ in 0..attempts {
            if self
                .at
                .send_and_await("AT+CGATT=1", &OK, t.bearer_timeout)
                .await
                .is_ok()
            {
                attached = true;
                break;
            }
            Timer::after(t.attach_retry).await;
        }
        if !attached {
            return Err(Error::AttachFailed);
        }

        self.configure_bearer().await?;
        if let Err(e) = self
            .at
            .send_and_await("AT+SAPBR=1,1", &OK, t.bearer_timeout)
            .await
        {
            debug!("Bearer open failed: {:?}", e);
        }

        for _ in 0..attempts {
            if self
                .at
                .send_and_await(
                    "AT+CGATT?",
                    &Expectation::Literal("+CGATT: 1"),
                    t.command_timeout,
                )
                .await
                .is_ok()
            {
                return Ok(());
            }
            Timer::after(t.attach_retry).await;
        }
        Err(Error::AttachFailed)
    }

    /// Close the bearer and detach from GPRS.
    pub async fn disable_gprs(&mut self) -> Result<(), Error> {
        let t = C::TIMING;
        self.at
            .send_and_await("AT+CIPSHUT", &Expectation::Literal("SHUT OK"), t.shut_timeout)
            .await
            .ok();
        self.at
            .send_and_await("AT+SAPBR=0,1", &OK, t.bearer_timeout)
            .await?;
        self.at.expect_ok("AT+CGATT=0").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{cmd, MockTransport, TestConfig};

    #[tokio::test]
    async fn attach_retries_and_uses_profile() {
        let (transport, handle) = MockTransport::new([
            cmd("AT+CIPSHUT", "SHUT OK\r\n"),
            cmd("AT+CIPMUX=1", "OK\r\n"),
            cmd("AT+CIPRXGET=1", "OK\r\n"),
            cmd("AT+CGATT=1", "ERROR\r\n"),
            cmd("AT+CGATT=1", "OK\r\n"),
            cmd("AT+SAPBR=3,1,\"CONTYPE\",\"GPRS\"", "OK\r\n"),
            cmd("AT+SAPBR=3,1,\"APN\",\"internet.beeline.ru\"", "OK\r\n"),
            cmd("AT+SAPBR=3,1,\"USER\",\"beeline\"", "OK\r\n"),
            cmd("AT+SAPBR=3,1,\"PWD\",\"beeline\"", "OK\r\n"),
            cmd("AT+SAPBR=1,1", "ERROR\r\n"),
            cmd("AT+CGATT?", "+CGATT: 0\r\n\r\nOK\r\n"),
            cmd("AT+CGATT?", "+CGATT: 1\r\n\r\nOK\r\n"),
        ]);
        let mut runner = Runner::new(transport, TestConfig::default());

        runner.enable_gprs(3).await.unwrap();
        assert_eq!(handle.remaining(), 0);
    }

    #[tokio::test]
    async fn attach_gives_up() {
        let (transport, _handle) = MockTransport::new([
            cmd("AT+CIPSHUT", "SHUT OK\r\n"),
            cmd("AT+CIPMUX=1", "OK\r\n"),
            cmd("AT+CIPRXGET=1", "OK\r\n"),
            cmd("AT+CGATT=1", "ERROR\r\n"),
            cmd("AT+CGATT=1", "ERROR\r\n"),
        ]);
        let mut runner = Runner::new(transport, TestConfig::default());

        assert_eq!(runner.enable_gprs(2).await, Err(Error::AttachFailed));
    }

    #[tokio::test]
    async fn detach() {
        let (transport, handle) = MockTransport::new([
            cmd("AT+CIPSHUT", "SHUT OK\r\n"),
            cmd("AT+SAPBR=0,1", "OK\r\n"),
            cmd("AT+CGATT=0", "OK\r\n"),
        ]);
        let mut runner = Runner::new(transport, TestConfig::default());

        runner.disable_gprs().await.unwrap();
        assert_eq!(handle.lines(), ["AT+CIPSHUT", "AT+SAPBR=0,1", "AT+CGATT=0"]);
    }
}
