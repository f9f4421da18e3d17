use crate::error::ConfigError;

pub const MIN_SKIP_INTERVAL: u32 = 1;
pub const MAX_SKIP_INTERVAL: u32 = 10;

pub fn validate_interval(interval: u32) -> Result<u32, ConfigError> {
    if (MIN_SKIP_INTERVAL..=MAX_SKIP_INTERVAL).contains(&interval) {
        Ok(interval)
    } else {
        Err(ConfigError::SkipInterval(interval))
    }
}

/// Accepts one of every `interval` submissions while enabled.
///
/// The first submission of each group is the one accepted, so a fresh
/// policy lets the very first frame through.
#[derive(Debug, Clone)]
pub struct SkipPolicy {
    enabled: bool,
    interval: u32,
    counter: u32,
}

impl SkipPolicy {
    pub fn new(enabled: bool, interval: u32) -> Result<Self, ConfigError> {
        Ok(Self {
            enabled,
            interval: validate_interval(interval)?,
            counter: 0,
        })
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled != enabled {
            self.enabled = enabled;
            self.counter = 0;
        }
    }

    pub fn set_interval(&mut self, interval: u32) -> Result<(), ConfigError> {
        self.interval = validate_interval(interval)?;
        self.counter = 0;
        Ok(())
    }

    /// Returns true if this submission should be accepted.
    pub fn admit(&mut self) -> bool {
        if !self.enabled || self.interval <= 1 {
            return true;
        }
        let accept = self.counter == 0;
        self.counter = (self.counter + 1) % self.interval;
        accept
    }
}

impl Default for SkipPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: 1,
            counter: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_accepts_everything() {
        let mut policy = SkipPolicy::new(false, 5).unwrap();
        assert!((0..20).all(|_| policy.admit()));
    }

    #[test]
    fn accepts_one_in_n() {
        for n in 1..=10 {
            let mut policy = SkipPolicy::new(true, n).unwrap();
            let submitted = 97;
            let accepted = (0..submitted).filter(|_| policy.admit()).count();
            let expected = submitted / n as usize;
            assert!(
                accepted.abs_diff(expected) <= 1,
                "n={n}: accepted {accepted}, expected ~{expected}"
            );
        }
    }

    #[test]
    fn first_submission_is_accepted() {
        let mut policy = SkipPolicy::new(true, 3).unwrap();
        let pattern: Vec<bool> = (0..6).map(|_| policy.admit()).collect();
        assert_eq!(pattern, [true, false, false, true, false, false]);
    }

    #[test]
    fn interval_bounds() {
        assert!(SkipPolicy::new(true, 0).is_err());
        assert!(SkipPolicy::new(true, 11).is_err());
        let mut policy = SkipPolicy::default();
        assert!(policy.set_interval(10).is_ok());
        assert!(policy.set_interval(42).is_err());
        assert_eq!(policy.interval(), 10);
    }
}
