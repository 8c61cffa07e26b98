//! Presence indicator output
//!
//! High while the current frame has at least one valid target, low otherwise.
//! Implementations only touch the output when the level changes.

use anyhow::Context;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info};

pub trait Indicator: Send {
    fn set(&mut self, on: bool) -> anyhow::Result<()>;
}

impl<T: Indicator + ?Sized> Indicator for Box<T> {
    fn set(&mut self, on: bool) -> anyhow::Result<()> {
        (**self).set(on)
    }
}

/// Pick the indicator for this host: a GPIO when a value path is configured
pub fn from_config(gpio_value_path: Option<&str>) -> Box<dyn Indicator> {
    match gpio_value_path {
        Some(path) => Box::new(GpioValueIndicator::new(path)),
        None => Box::new(LogIndicator::new()),
    }
}

/// Indicator without hardware; logs level changes
#[derive(Debug, Default)]
pub struct LogIndicator {
    level: Option<bool>,
}

impl LogIndicator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Indicator for LogIndicator {
    fn set(&mut self, on: bool) -> anyhow::Result<()> {
        if self.level != Some(on) {
            debug!(on = on, "indicator_changed");
            self.level = Some(on);
        }
        Ok(())
    }
}

/// Drives a sysfs GPIO by writing `1`/`0` to its `value` file.
/// The pin must already be exported and configured as an output.
#[derive(Debug)]
pub struct GpioValueIndicator {
    path: PathBuf,
    level: Option<bool>,
}

impl GpioValueIndicator {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        info!(path = %path.display(), "indicator_gpio_configured");
        Self { path, level: None }
    }
}

impl Indicator for GpioValueIndicator {
    fn set(&mut self, on: bool) -> anyhow::Result<()> {
        if self.level == Some(on) {
            return Ok(());
        }
        fs::write(&self.path, if on { "1" } else { "0" })
            .with_context(|| format!("Failed to write indicator {}", self.path.display()))?;
        self.level = Some(on);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_gpio_indicator_writes_level() {
        let file = NamedTempFile::new().unwrap();
        let mut indicator = GpioValueIndicator::new(file.path());

        indicator.set(true).unwrap();
        assert_eq!(fs::read_to_string(file.path()).unwrap(), "1");

        indicator.set(false).unwrap();
        assert_eq!(fs::read_to_string(file.path()).unwrap(), "0");
    }

    #[test]
    fn test_gpio_indicator_skips_unchanged_level() {
        let file = NamedTempFile::new().unwrap();
        let mut indicator = GpioValueIndicator::new(file.path());

        indicator.set(true).unwrap();
        // Overwrite behind the indicator's back; an unchanged level must not rewrite
        fs::write(file.path(), "x").unwrap();
        indicator.set(true).unwrap();
        assert_eq!(fs::read_to_string(file.path()).unwrap(), "x");
    }

    #[test]
    fn test_gpio_indicator_reports_write_failure() {
        let mut indicator = GpioValueIndicator::new("/nonexistent/gpio/value");
        assert!(indicator.set(true).is_err());
        // Failed write does not latch the level, so the next call retries
        assert!(indicator.set(true).is_err());
    }

    #[test]
    fn test_log_indicator_accepts_levels() {
        let mut indicator = LogIndicator::new();
        assert!(indicator.set(true).is_ok());
        assert!(indicator.set(false).is_ok());
    }
}
