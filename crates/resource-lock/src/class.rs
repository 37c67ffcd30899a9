//! Lock duration classes.

use relay_core::LockSettings;
use std::time::Duration;

/// How long a critical section is expected to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DurationClass {
    Short,
    Medium,
    Long,
}

/// Base durations per class, the skew multiplier, and the extension lead time.
#[derive(Debug, Clone)]
pub struct LockDurations {
    pub short: Duration,
    pub medium: Duration,
    pub long: Duration,
    pub multiplier: f64,
    /// Extend when this close to expiry.
    pub extension_threshold: Duration,
}

impl LockDurations {
    pub fn from_settings(settings: &LockSettings) -> Self {
        Self {
            short: Duration::from_millis(settings.short_ms),
            medium: Duration::from_millis(settings.medium_ms),
            long: Duration::from_millis(settings.long_ms),
            multiplier: settings.duration_multiplier,
            extension_threshold: Duration::from_millis(settings.extension_threshold_ms),
        }
    }

    pub fn base(&self, class: DurationClass) -> Duration {
        match class {
            DurationClass::Short => self.short,
            DurationClass::Medium => self.medium,
            DurationClass::Long => self.long,
        }
    }

    /// Lease TTL for `class`, scaled by the multiplier.
    pub fn ttl(&self, class: DurationClass) -> Duration {
        self.base(class).mul_f64(self.multiplier.max(1.0))
    }
}

impl Default for LockDurations {
    fn default() -> Self {
        Self::from_settings(&LockSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_applies_multiplier() {
        let durations = LockDurations::default();
        assert_eq!(durations.ttl(DurationClass::Short), Duration::from_millis(7_500));
        assert_eq!(durations.ttl(DurationClass::Medium), Duration::from_millis(45_000));
        assert_eq!(durations.ttl(DurationClass::Long), Duration::from_millis(180_000));
    }

    #[test]
    fn multiplier_never_shrinks_the_lease() {
        let durations = LockDurations {
            multiplier: 0.5,
            ..LockDurations::default()
        };
        assert_eq!(durations.ttl(DurationClass::Short), durations.short);
    }
}
