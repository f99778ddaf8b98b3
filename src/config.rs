//! Session configuration

use std::ops::RangeInclusive;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;

#[derive(Debug, Clone, Args)]
pub struct SessionConfig {
    /// Headless X server binary to launch
    #[arg(long, default_value = "Xvfb")]
    pub server: String,

    /// Screen geometry as WIDTHxHEIGHTxDEPTH
    #[arg(long, default_value = "1280x720x24")]
    pub screen: String,

    /// Lowest display number to try
    #[arg(long, default_value_t = 1)]
    pub first_display: u32,

    /// Highest display number to try
    #[arg(long, default_value_t = 99)]
    pub last_display: u32,

    /// How long to wait for the server to accept connections (ms)
    #[arg(long, default_value_t = 5000)]
    pub startup_timeout_ms: u64,

    /// Interval between readiness checks (ms)
    #[arg(long, default_value_t = 100)]
    pub startup_poll_ms: u64,

    /// Grace period between SIGTERM and SIGKILL on teardown (ms)
    #[arg(long, default_value_t = 1000)]
    pub shutdown_grace_ms: u64,

    /// Fail setup if the Composite extension is missing
    #[arg(long)]
    pub require_composite: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server: "Xvfb".into(),
            screen: "1280x720x24".into(),
            first_display: 1,
            last_display: 99,
            startup_timeout_ms: 5000,
            startup_poll_ms: 100,
            shutdown_grace_ms: 1000,
            require_composite: false,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.first_display > self.last_display {
            bail!(
                "empty display range {}..={}",
                self.first_display,
                self.last_display
            );
        }
        if self.startup_poll_ms == 0 {
            bail!("startup poll interval must be positive");
        }
        self.screen_geometry()?;
        Ok(())
    }

    /// (width, height, depth) parsed from `screen`
    pub fn screen_geometry(&self) -> Result<(u32, u32, u32)> {
        let parts: Vec<&str> = self.screen.split('x').collect();
        let [w, h, d] = parts.as_slice() else {
            bail!("invalid screen spec {:?} (expected WxHxD)", self.screen);
        };
        let parse = |s: &str| -> Result<u32> {
            s.parse()
                .with_context(|| format!("invalid screen spec {:?}", self.screen))
        };
        let (w, h, d) = (parse(*w)?, parse(*h)?, parse(*d)?);
        if w == 0 || h == 0 || !matches!(d, 8 | 15 | 16 | 24 | 32) {
            bail!("invalid screen spec {:?}", self.screen);
        }
        Ok((w, h, d))
    }

    pub fn displays(&self) -> RangeInclusive<u32> {
        self.first_display..=self.last_display
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn startup_poll(&self) -> Duration {
        Duration::from_millis(self.startup_poll_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Arguments for the server process on display `n`
    pub fn server_args(&self, display: u32) -> Vec<String> {
        vec![
            format!(":{}", display),
            "-ac".into(),
            "-screen".into(),
            "0".into(),
            self.screen.clone(),
            "+extension".into(),
            "Composite".into(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SessionConfig::default();
        config.validate().unwrap();
        assert_eq!(config.screen_geometry().unwrap(), (1280, 720, 24));
        assert_eq!(config.displays(), 1..=99);
    }

    #[test]
    fn test_server_args() {
        let args = SessionConfig::default().server_args(7);
        assert_eq!(
            args,
            vec![":7", "-ac", "-screen", "0", "1280x720x24", "+extension", "Composite"]
        );
    }

    #[test]
    fn test_rejects_bad_screen_and_range() {
        let mut config = SessionConfig {
            screen: "1280x720".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
        config.screen = "0x720x24".into();
        assert!(config.validate().is_err());
        config.screen = "1280x720x7".into();
        assert!(config.validate().is_err());

        let config = SessionConfig {
            first_display: 10,
            last_display: 3,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
