//! Intensity and duration resolution
//!
//! Fixed or uniformly random values per the effective (group-resolved)
//! behavior; random durations are quantized to the configured step and
//! always land inside `[min, max]`.

use std::time::Duration;

use rand::Rng;

use crate::config::EffectiveBehavior;

/// Resolve a one-shot command intensity (0..=100).
pub fn resolve_intensity(eff: &EffectiveBehavior) -> u8 {
    if !eff.random_intensity {
        return eff.fixed_intensity.min(100);
    }
    let (min, max) = ordered(eff.intensity_min, eff.intensity_max);
    rand::thread_rng().gen_range(min..=max).min(100)
}

/// Resolve a one-shot command duration.
pub fn resolve_duration(eff: &EffectiveBehavior) -> Duration {
    if !eff.random_duration {
        return Duration::from_millis(eff.fixed_duration_ms);
    }
    let (min, max) = ordered(eff.duration_min_ms, eff.duration_max_ms);
    Duration::from_millis(random_quantized(min, max, eff.random_duration_step_ms))
}

/// Map a normalized 0..1 value onto the configured intensity scale: 0 maps
/// to the minimum (zero in fixed mode), 1 to the maximum (the fixed value).
pub fn scaled_intensity(eff: &EffectiveBehavior, t: f32) -> u8 {
    let t = t.clamp(0.0, 1.0);
    let (lo, hi) = if eff.random_intensity {
        let (min, max) = ordered(eff.intensity_min, eff.intensity_max);
        (min as f32, max as f32)
    } else {
        (0.0, eff.fixed_intensity as f32)
    };
    (lo + (hi - lo) * t).round().min(100.0) as u8
}

/// Uniform random multiple of `step` within `[min, max]`.
///
/// Falls back to `min` when the step is zero or no multiple fits the
/// window.
fn random_quantized(min: u64, max: u64, step: u64) -> u64 {
    if step == 0 {
        return rand::thread_rng().gen_range(min..=max);
    }
    let lowest = min.div_ceil(step);
    let highest = max / step;
    if highest < lowest {
        return min;
    }
    rand::thread_rng().gen_range(lowest..=highest) * step
}

fn ordered<T: Ord>(a: T, b: T) -> (T, T) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BehaviorConfig;

    fn eff(mutate: impl FnOnce(&mut BehaviorConfig)) -> EffectiveBehavior {
        let mut behavior = BehaviorConfig::default();
        mutate(&mut behavior);
        behavior.for_group(None)
    }

    #[test]
    fn fixed_modes_ignore_the_ranges() {
        let eff = eff(|b| {
            b.random_intensity = false;
            b.fixed_intensity = 42;
            b.random_duration = false;
            b.fixed_duration_ms = 1234;
        });
        for _ in 0..10 {
            assert_eq!(resolve_intensity(&eff), 42);
            assert_eq!(resolve_duration(&eff), Duration::from_millis(1234));
        }
    }

    #[test]
    fn random_intensity_stays_in_range() {
        let eff = eff(|b| {
            b.random_intensity = true;
            b.intensity_min = 10;
            b.intensity_max = 20;
        });
        for _ in 0..100 {
            let v = resolve_intensity(&eff);
            assert!((10..=20).contains(&v), "{v} out of range");
        }
    }

    #[test]
    fn random_duration_is_a_step_multiple_within_bounds() {
        let eff = eff(|b| {
            b.random_duration = true;
            b.duration_min_ms = 1050;
            b.duration_max_ms = 4990;
            b.random_duration_step_ms = 100;
        });
        for _ in 0..200 {
            let ms = resolve_duration(&eff).as_millis() as u64;
            assert_eq!(ms % 100, 0, "{ms} not on the step grid");
            assert!((1050..=4990).contains(&ms), "{ms} out of bounds");
        }
    }

    #[test]
    fn degenerate_quantization_window_falls_back_to_min() {
        // No multiple of 1000 lies in [1050, 1400].
        assert_eq!(random_quantized(1050, 1400, 1000), 1050);
    }

    #[test]
    fn scaled_intensity_endpoints() {
        let random = eff(|b| {
            b.random_intensity = true;
            b.intensity_min = 10;
            b.intensity_max = 80;
        });
        assert_eq!(scaled_intensity(&random, 0.0), 10);
        assert_eq!(scaled_intensity(&random, 1.0), 80);

        let fixed = eff(|b| {
            b.random_intensity = false;
            b.fixed_intensity = 60;
        });
        assert_eq!(scaled_intensity(&fixed, 0.0), 0);
        assert_eq!(scaled_intensity(&fixed, 1.0), 60);
        assert_eq!(scaled_intensity(&fixed, 0.5), 30);
    }

    #[test]
    fn scaled_intensity_clamps_inputs() {
        let eff = eff(|b| {
            b.random_intensity = false;
            b.fixed_intensity = 100;
        });
        assert_eq!(scaled_intensity(&eff, -1.0), 0);
        assert_eq!(scaled_intensity(&eff, 2.0), 100);
    }

    #[test]
    fn inverted_ranges_are_tolerated() {
        let eff = eff(|b| {
            b.random_intensity = true;
            b.intensity_min = 30;
            b.intensity_max = 10;
        });
        for _ in 0..50 {
            let v = resolve_intensity(&eff);
            assert!((10..=30).contains(&v));
        }
    }
}
