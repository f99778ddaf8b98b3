//! Nested X server subprocess

use std::ops::RangeInclusive;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;

const X11_UNIX_DIR: &str = "/tmp/.X11-unix";
const REAP_POLL: Duration = Duration::from_millis(100);

/// A running headless X server on a display number we picked.
/// Dropping the session terminates the server.
pub struct Session {
    display: u32,
    child: Option<Child>,
    grace: Duration,
}

impl Session {
    /// Pick a free display, start the server and wait until it accepts
    /// connections
    pub fn launch(config: &SessionConfig) -> Result<Self> {
        config.validate()?;
        let number = find_available_display(config.displays())
            .context("no available X display numbers")?;

        info!("launching {} on display :{}", config.server, number);
        let child = Command::new(&config.server)
            .args(config.server_args(number))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to start {}", config.server))?;

        let mut session = Self {
            display: number,
            child: Some(child),
            grace: config.shutdown_grace(),
        };
        // on error the drop below kills the child
        session.wait_until_listening(config.startup_timeout(), config.startup_poll())?;
        Ok(session)
    }

    fn wait_until_listening(&mut self, timeout: Duration, poll: Duration) -> Result<()> {
        let name = self.display_name();
        let deadline = Instant::now() + timeout;
        loop {
            thread::sleep(poll);

            if x11rb::connect(Some(&name)).is_ok() {
                info!("X server listening on {}", name);
                return Ok(());
            }
            if let Some(child) = self.child.as_mut() {
                if let Some(status) = child.try_wait()? {
                    self.child = None;
                    bail!("X server on {} exited during startup ({})", name, status);
                }
            }
            if Instant::now() >= deadline {
                bail!("timed out waiting for X server on {}", name);
            }
        }
    }

    pub fn display_number(&self) -> u32 {
        self.display
    }

    /// Value for `DISPLAY` in client processes
    pub fn display_name(&self) -> String {
        format!(":{}", self.display)
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// SIGTERM, wait out the grace period, then SIGKILL. Idempotent.
    pub fn terminate(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        let pid = child.id();
        info!("terminating X server (pid {})", pid);
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }

        let deadline = Instant::now() + self.grace;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!("X server exited: {}", status);
                    return;
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(REAP_POLL),
                Ok(None) => break,
                Err(e) => {
                    warn!("failed to poll X server: {e}");
                    break;
                }
            }
        }

        warn!("force killing X server (pid {})", pid);
        let _ = child.kill();
        let _ = child.wait();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// A display is taken if something answers on it or its socket/lock exists
fn display_in_use(display: u32) -> bool {
    if x11rb::connect(Some(&format!(":{}", display))).is_ok() {
        return true;
    }
    Path::new(&format!("{}/X{}", X11_UNIX_DIR, display)).exists()
        || Path::new(&format!("/tmp/.X{}-lock", display)).exists()
}

pub fn find_available_display(range: RangeInclusive<u32>) -> Option<u32> {
    range.into_iter().find(|&display| !display_in_use(display))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_config(server: &str) -> SessionConfig {
        SessionConfig {
            server: server.into(),
            first_display: 4000,
            last_display: 4099,
            startup_timeout_ms: 500,
            startup_poll_ms: 20,
            shutdown_grace_ms: 100,
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_server_binary_fails() {
        let err = Session::launch(&quick_config("x11nest-no-such-server")).err().unwrap();
        assert!(err.to_string().contains("failed to start"));
    }

    #[test]
    fn test_server_exiting_early_fails() {
        let err = Session::launch(&quick_config("false")).err().unwrap();
        assert!(err.to_string().contains("exited during startup"), "{err:#}");
    }

    #[test]
    fn test_invalid_config_fails_before_spawn() {
        let mut config = quick_config("false");
        config.screen = "big".into();
        assert!(Session::launch(&config).is_err());
    }

    #[test]
    fn test_accessors_and_idempotent_terminate() {
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();
        let mut session = Session {
            display: 4321,
            child: Some(child),
            grace: Duration::from_millis(500),
        };
        assert_eq!(session.display_number(), 4321);
        assert_eq!(session.display_name(), ":4321");
        assert_eq!(session.pid(), Some(pid));

        let started = Instant::now();
        session.terminate();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(session.pid(), None);
        session.terminate();
        assert_eq!(session.pid(), None);
    }

    #[test]
    fn test_find_available_display_skips_nothing_in_unused_range() {
        assert_eq!(find_available_display(4100..=4105), Some(4100));
        assert_eq!(find_available_display(5..=4), None);
    }
}
