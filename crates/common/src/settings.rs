//! Per-broadcast settings and pacing policy.

use std::{collections::BTreeSet, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Delay between two consecutive sends of one mailer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum IntervalPolicy {
    /// Constant delay.
    Fixed { seconds: f64 },
    /// Spread the whole batch over `period_seconds`, whatever its size.
    #[serde(rename_all = "camelCase")]
    Dynamic { period_seconds: f64 },
}

impl Default for IntervalPolicy {
    fn default() -> Self {
        Self::Fixed { seconds: 0.0 }
    }
}

fn check_seconds(seconds: f64) -> Result<f64> {
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(Error::InvalidInterval { seconds });
    }
    Ok(seconds)
}

impl IntervalPolicy {
    pub fn fixed(seconds: f64) -> Result<Self> {
        Ok(Self::Fixed {
            seconds: check_seconds(seconds)?,
        })
    }

    pub fn dynamic(period_seconds: f64) -> Result<Self> {
        Ok(Self::Dynamic {
            period_seconds: check_seconds(period_seconds)?,
        })
    }

    /// Re-check a policy that came from deserialization.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Fixed { seconds } => check_seconds(*seconds).map(|_| ()),
            Self::Dynamic { period_seconds } => check_seconds(*period_seconds).map(|_| ()),
        }
    }

    /// Delay to wait between sends given the number of recipients left.
    ///
    /// The mailer calls this once per run with the pending count at start.
    pub fn next_delay(&self, remaining: usize) -> Duration {
        let seconds = match *self {
            Self::Fixed { seconds } => seconds,
            Self::Dynamic { period_seconds } => {
                if remaining == 0 {
                    0.0
                } else {
                    period_seconds / remaining as f64
                }
            },
        };
        Duration::try_from_secs_f64(seconds).unwrap_or(Duration::ZERO)
    }
}

/// Behaviour switches of one mailer. Fixed at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MailerSettings {
    pub interval: IntervalPolicy,
    /// Start automatically when restored at process startup.
    pub run_on_startup: bool,
    /// Honour rate-limit back-off and retry the same recipient.
    pub handle_retry_after: bool,
    /// Destroy (and forget) the mailer once every recipient was attempted.
    pub destroy_on_complete: bool,
    /// Do not emit lifecycle events for this mailer.
    pub disable_events: bool,
    /// Persist the mailer to the configured store.
    pub preserve: bool,
    /// Placeholder keys never substituted for this mailer.
    pub excluded_placeholders: BTreeSet<String>,
}

impl Default for MailerSettings {
    fn default() -> Self {
        Self {
            interval: IntervalPolicy::default(),
            run_on_startup: false,
            handle_retry_after: true,
            destroy_on_complete: false,
            disable_events: false,
            preserve: true,
            excluded_placeholders: BTreeSet::new(),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[test]
    fn dynamic_interval_spreads_period() {
        let policy = IntervalPolicy::dynamic(10.0).unwrap();
        assert_eq!(policy.next_delay(5), Duration::from_secs(2));
    }

    #[test]
    fn dynamic_interval_with_no_recipients_is_zero() {
        let policy = IntervalPolicy::dynamic(10.0).unwrap();
        assert_eq!(policy.next_delay(0), Duration::ZERO);
    }

    #[test]
    fn fixed_interval_ignores_remaining() {
        let policy = IntervalPolicy::fixed(1.5).unwrap();
        assert_eq!(policy.next_delay(0), Duration::from_millis(1500));
        assert_eq!(policy.next_delay(1000), Duration::from_millis(1500));
    }

    #[rstest]
    #[case(-1.0)]
    #[case(f64::NAN)]
    #[case(f64::INFINITY)]
    fn invalid_seconds_are_rejected(#[case] seconds: f64) {
        assert!(IntervalPolicy::fixed(seconds).is_err());
        assert!(IntervalPolicy::dynamic(seconds).is_err());
    }

    #[test]
    fn settings_defaults_from_empty_json() {
        let settings: MailerSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, MailerSettings::default());
        assert!(settings.handle_retry_after);
        assert!(settings.preserve);
    }

    #[test]
    fn interval_serializes_with_kind_tag() {
        let json = serde_json::to_value(IntervalPolicy::Dynamic {
            period_seconds: 60.0,
        })
        .unwrap();
        assert_eq!(json["kind"], "dynamic");
        assert_eq!(json["periodSeconds"], 60.0);
    }
}
