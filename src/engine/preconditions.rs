//! Safety preconditions
//!
//! Every command dispatch runs through [`check`]. Evaluation order is
//! fixed: kill switch, group pause, AFK, cooldown; the first match wins.
//! Any non-success outcome clears the group's armed trigger.

use std::time::{Duration, Instant};

use crate::config::BehaviorConfig;
use crate::groups::{ProgramGroup, TriggerMethod};

/// Outcome of a precondition check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckResult {
    Success,
    /// Global pause is active.
    KillSwitch,
    /// This group's own pause flag is set.
    Paused,
    /// User is AFK and AFK gating is configured.
    Afk,
    /// Still inside `last_executed + cooldown + last_duration`.
    Cooldown,
}

impl CheckResult {
    pub fn is_success(self) -> bool {
        self == CheckResult::Success
    }
}

/// Evaluate the safety gates for a group at `now`.
pub fn check(
    group: &mut ProgramGroup,
    behavior: &BehaviorConfig,
    afk: bool,
    now: Instant,
) -> CheckResult {
    let result = evaluate(group, behavior, afk, now);
    if !result.is_success() {
        group.trigger_method = TriggerMethod::None;
    }
    result
}

fn evaluate(
    group: &ProgramGroup,
    behavior: &BehaviorConfig,
    afk: bool,
    now: Instant,
) -> CheckResult {
    if behavior.paused {
        return CheckResult::KillSwitch;
    }
    if group.paused {
        return CheckResult::Paused;
    }
    if afk && behavior.disable_while_afk {
        return CheckResult::Afk;
    }
    let cooldown = Duration::from_millis(
        behavior
            .for_group(group.config.as_ref())
            .cooldown_time_ms,
    );
    if let Some(end) = group.cooldown_ends_at(cooldown) {
        if now < end {
            return CheckResult::Cooldown;
        }
    }
    CheckResult::Success
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::groups::ProgramGroup;
    use uuid::Uuid;

    fn group() -> ProgramGroup {
        ProgramGroup::new(Uuid::new_v4(), "Leg", None)
    }

    #[test]
    fn order_is_killswitch_pause_afk_cooldown() {
        let now = Instant::now();
        let mut behavior = BehaviorConfig {
            paused: true,
            disable_while_afk: true,
            ..BehaviorConfig::default()
        };
        let mut g = group();
        g.paused = true;
        g.last_executed = Some(now);
        g.last_duration = Duration::from_secs(1);

        // Everything is wrong at once; kill switch reports first.
        assert_eq!(check(&mut g, &behavior, true, now), CheckResult::KillSwitch);

        behavior.paused = false;
        assert_eq!(check(&mut g, &behavior, true, now), CheckResult::Paused);

        g.paused = false;
        assert_eq!(check(&mut g, &behavior, true, now), CheckResult::Afk);

        assert_eq!(check(&mut g, &behavior, false, now), CheckResult::Cooldown);

        g.last_executed = None;
        assert_eq!(check(&mut g, &behavior, false, now), CheckResult::Success);
    }

    #[test]
    fn failure_clears_the_armed_trigger() {
        let behavior = BehaviorConfig {
            paused: true,
            ..BehaviorConfig::default()
        };
        let mut g = group();
        g.trigger_method = TriggerMethod::Manual;
        let outcome = check(&mut g, &behavior, false, Instant::now());
        assert!(!outcome.is_success());
        assert_eq!(g.trigger_method, TriggerMethod::None);
    }

    #[test]
    fn success_leaves_the_trigger_armed() {
        let behavior = BehaviorConfig::default();
        let mut g = group();
        g.trigger_method = TriggerMethod::Manual;
        assert!(check(&mut g, &behavior, false, Instant::now()).is_success());
        assert_eq!(g.trigger_method, TriggerMethod::Manual);
    }

    #[test]
    fn afk_gating_is_configurable() {
        let behavior = BehaviorConfig {
            disable_while_afk: false,
            ..BehaviorConfig::default()
        };
        let mut g = group();
        assert!(check(&mut g, &behavior, true, Instant::now()).is_success());
    }

    #[test]
    fn cooldown_respects_group_override() {
        let now = Instant::now();
        let behavior = BehaviorConfig {
            cooldown_time_ms: 60_000,
            ..BehaviorConfig::default()
        };
        let mut g = ProgramGroup::new(
            Uuid::new_v4(),
            "Leg",
            Some(crate::config::Group {
                override_cooldown: true,
                cooldown_time_ms: 100,
                ..crate::config::Group::default()
            }),
        );
        g.last_executed = Some(now);
        g.last_duration = Duration::ZERO;

        assert_eq!(check(&mut g, &behavior, false, now), CheckResult::Cooldown);
        // Past the short group override the global value no longer applies.
        let later = now + Duration::from_millis(150);
        assert!(check(&mut g, &behavior, false, later).is_success());
    }
}
