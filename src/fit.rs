//! ROM usage evaluation, run before any byte goes over the wire.

use core::fmt;

use crate::device::DeviceProfile;

/// ROM usage classification. Overflow is a hard stop, the rest are
/// user-facing risk signals.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum UsageTier {
    Ok,
    Caution,
    Critical,
    Overflow,
}

impl fmt::Display for UsageTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UsageTier::Ok => "ok",
            UsageTier::Caution => "caution",
            UsageTier::Critical => "critical",
            UsageTier::Overflow => "overflow",
        };
        f.write_str(s)
    }
}

/// Outcome of checking an image against a target's ROM
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct UsageVerdict {
    pub percent: f64,
    pub tier: UsageTier,
}

impl UsageVerdict {
    /// Whether programming may proceed at all
    pub fn fits(&self) -> bool {
        self.tier != UsageTier::Overflow
    }
}

/// Classify how much of the target's ROM the image occupies.
///
/// Pure function; the session layer never re-validates size, so callers
/// must stop on an Overflow verdict before constructing one.
pub fn evaluate(image_bytes: usize, profile: &DeviceProfile) -> UsageVerdict {
    let percent = image_bytes as f64 * 100.0 / f64::from(profile.rom_bytes);
    let tier = if percent > 100.0 {
        UsageTier::Overflow
    } else if percent >= 75.0 {
        UsageTier::Critical
    } else if percent >= 50.0 {
        UsageTier::Caution
    } else {
        UsageTier::Ok
    };

    UsageVerdict { percent, tier }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device;

    fn profile_4k() -> &'static DeviceProfile {
        device::lookup("AT89S51").unwrap()
    }

    #[test]
    fn classifies_half_full_as_caution() {
        let verdict = evaluate(2048, profile_4k());
        assert_eq!(verdict.percent, 50.0);
        assert_eq!(verdict.tier, UsageTier::Caution);
    }

    #[test]
    fn exact_fit_is_critical_not_overflow() {
        let verdict = evaluate(4096, profile_4k());
        assert_eq!(verdict.percent, 100.0);
        assert_eq!(verdict.tier, UsageTier::Critical);
        assert!(verdict.fits());
    }

    #[test]
    fn one_byte_over_is_overflow() {
        let verdict = evaluate(4097, profile_4k());
        assert_eq!(verdict.tier, UsageTier::Overflow);
        assert!(!verdict.fits());
    }

    #[test]
    fn tier_boundaries() {
        assert_eq!(evaluate(0, profile_4k()).tier, UsageTier::Ok);
        assert_eq!(evaluate(2047, profile_4k()).tier, UsageTier::Ok);
        assert_eq!(evaluate(2048, profile_4k()).tier, UsageTier::Caution);
        assert_eq!(evaluate(3071, profile_4k()).tier, UsageTier::Caution);
        assert_eq!(evaluate(3072, profile_4k()).tier, UsageTier::Critical);
        assert_eq!(evaluate(4096, profile_4k()).tier, UsageTier::Critical);
        assert_eq!(evaluate(4097, profile_4k()).tier, UsageTier::Overflow);
    }

    #[test]
    fn usage_is_monotonic_in_size() {
        let mut last = evaluate(0, profile_4k()).percent;
        for size in 1..=5000usize {
            let percent = evaluate(size, profile_4k()).percent;
            assert!(percent > last);
            last = percent;
        }
    }
}
