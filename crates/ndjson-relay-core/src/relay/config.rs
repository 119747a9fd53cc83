use crate::{Error, Result};
use core::time::Duration;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);
pub const DEFAULT_LINE_PAUSE: Duration = Duration::from_millis(20);
pub const DEFAULT_MAX_IDLE_TIME: Duration = Duration::from_millis(45_000);
pub const DEFAULT_SENTINELS: [&str; 4] = ["END-OF-FILE", "END-OF-LIST", "EOL", "EOF"];

/// The reserved values that end a task's output.
///
/// Matching is exact and case-sensitive, applied after trimming surrounding
/// whitespace from the popped value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentinels(Vec<String>);

impl Default for Sentinels {
    fn default() -> Self {
        Self(DEFAULT_SENTINELS.iter().map(|s| (*s).to_string()).collect())
    }
}

impl Sentinels {
    /// Builds a vocabulary from `values`, trimming each and dropping blanks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if nothing is left.
    pub fn new<I, S>(values: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut sentinels: Vec<String> = Vec::new();
        for value in values {
            let value = value.as_ref().trim();
            if !value.is_empty() && !sentinels.iter().any(|s| s == value) {
                sentinels.push(value.to_string());
            }
        }
        if sentinels.is_empty() {
            return Err(Error::InvalidConfig {
                reason: "at least one termination sentinel is required".to_string(),
            });
        }
        Ok(Self(sentinels))
    }

    pub fn contains(&self, value: &str) -> bool {
        self.0.iter().any(|s| s == value)
    }

    /// The value producers should append when they are done.
    pub fn primary(&self) -> &str {
        // `new` and `default` never build an empty vocabulary.
        self.0.first().map_or(DEFAULT_SENTINELS[0], String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// Timing and termination settings shared by every relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Wait between polls while the output list is empty.
    pub poll_interval: Duration,
    /// Wait after each forwarded line.
    pub line_pause: Duration,
    /// Longest time without a forwarded line before the stream times out.
    pub max_idle_time: Duration,
    /// Line sent to the client on timeout. Empty means send nothing.
    pub timeout_message: String,
    pub sentinels: Sentinels,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            line_pause: DEFAULT_LINE_PAUSE,
            max_idle_time: DEFAULT_MAX_IDLE_TIME,
            timeout_message: String::new(),
            sentinels: Sentinels::default(),
        }
    }
}

impl RelayConfig {
    /// Checks that the timings can make progress.
    ///
    /// A zero `line_pause` is allowed; a zero poll interval would spin on the
    /// store and a zero idle time would time out every stream immediately.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(Error::InvalidConfig {
                reason: "poll interval must be greater than zero".to_string(),
            });
        }
        if self.max_idle_time.is_zero() {
            return Err(Error::InvalidConfig {
                reason: "max idle time must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_vocabulary() {
        let sentinels = Sentinels::default();
        for value in DEFAULT_SENTINELS {
            assert!(sentinels.contains(value));
        }
        assert!(!sentinels.contains("eof"));
        assert_eq!(sentinels.primary(), "END-OF-FILE");
    }

    #[test]
    fn custom_vocabulary_is_trimmed_and_deduplicated() {
        let sentinels = Sentinels::new([" DONE ", "", "DONE", "STOP"]).unwrap();
        assert_eq!(sentinels.iter().collect::<Vec<_>>(), vec!["DONE", "STOP"]);
        assert!(Sentinels::new(["  ", ""]).is_err());
    }

    #[test]
    fn zero_timings_are_rejected() {
        let config = RelayConfig {
            poll_interval: Duration::ZERO,
            ..RelayConfig::default()
        };
        assert!(config.validate().is_err());

        let config = RelayConfig {
            max_idle_time: Duration::ZERO,
            ..RelayConfig::default()
        };
        assert!(config.validate().is_err());

        let config = RelayConfig {
            line_pause: Duration::ZERO,
            ..RelayConfig::default()
        };
        assert!(config.validate().is_ok());
    }
}
