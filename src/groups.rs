//! Runtime group state
//!
//! Each configured [`Group`](crate::config::Group) gets a [`ProgramGroup`]
//! holding its live trigger state and outbound parameters. The map is
//! rebuilt wholesale on config or avatar change and always contains the
//! synthetic "All" group under the nil id.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::config::{Config, Group};
use crate::osc::params::ChangeTracked;

/// Namespace prefix for every parameter this bridge owns.
pub const SHOCKOSC_PREFIX: &str = "/avatar/parameters/ShockOsc/";

/// Name of the synthetic group targeting every shocker.
pub const ALL_GROUP_NAME: &str = "All";

/// Remote command types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlType {
    Stop,
    Shock,
    Vibrate,
    Sound,
}

impl ControlType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stop => "Stop",
            Self::Shock => "Shock",
            Self::Vibrate => "Vibrate",
            Self::Sound => "Sound",
        }
    }
}

/// How the pending trigger was armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerMethod {
    #[default]
    None,
    Manual,
    PhysBoneRelease,
}

/// Live state for one control target.
pub struct ProgramGroup {
    pub id: Uuid,
    pub name: String,
    /// Config snapshot this group was built from; `None` for "All".
    pub config: Option<Group>,

    pub active: ChangeTracked<bool>,
    pub cooldown: ChangeTracked<bool>,
    pub cooldown_percentage: ChangeTracked<f32>,
    pub intensity: ChangeTracked<f32>,

    pub last_active: Option<Instant>,
    pub last_executed: Option<Instant>,
    pub last_duration: Duration,
    /// Intensity of the last shock, published while active or cooling down.
    pub last_intensity: u8,
    /// Damper for the while-held re-issue rate.
    pub last_vibration: Option<Instant>,
    pub last_stretch: f32,
    pub is_grabbed: bool,
    pub grabbed_at: Option<Instant>,
    pub trigger_method: TriggerMethod,
    /// One-shot overrides, consumed by the next dispatch.
    pub next_intensity: Option<u8>,
    pub next_duration: Option<Duration>,
    /// Continuous streaming state. A nonzero intensity streams frames every
    /// check tick; dropping back to zero emits exactly one Stop frame.
    pub concurrent_intensity: f32,
    pub concurrent_type: ControlType,
    /// Cap on the while-held action, captured at grab time.
    pub physbone_grab_limit: Option<Duration>,
    /// Per-group pause, independent of the global kill switch.
    pub paused: bool,
}

impl ProgramGroup {
    pub fn new(id: Uuid, name: impl Into<String>, config: Option<Group>) -> Self {
        let name = name.into();
        let addr = |suffix: &str| format!("{SHOCKOSC_PREFIX}{name}_{suffix}");
        Self {
            id,
            active: ChangeTracked::new(addr("Active"), false),
            cooldown: ChangeTracked::new(addr("Cooldown"), false),
            cooldown_percentage: ChangeTracked::new(addr("CooldownPercentage"), 0.0),
            intensity: ChangeTracked::new(addr("Intensity"), 0.0),
            name,
            config,
            last_active: None,
            last_executed: None,
            last_duration: Duration::ZERO,
            last_intensity: 0,
            last_vibration: None,
            last_stretch: 0.0,
            is_grabbed: false,
            grabbed_at: None,
            trigger_method: TriggerMethod::None,
            next_intensity: None,
            next_duration: None,
            concurrent_intensity: 0.0,
            concurrent_type: ControlType::Stop,
            physbone_grab_limit: None,
            paused: false,
        }
    }

    /// Member shocker ids; `None` means every shocker.
    pub fn members(&self) -> Option<&[Uuid]> {
        self.config.as_ref().map(|g| g.shockers.as_slice())
    }

    /// Clear transient physbone/trigger state. Called on avatar change.
    pub fn reset(&mut self) {
        self.is_grabbed = false;
        self.grabbed_at = None;
        self.last_stretch = 0.0;
        self.trigger_method = TriggerMethod::None;
    }

    /// Force the next publish to resend every outbound parameter.
    pub fn invalidate_params(&mut self) {
        self.active.invalidate();
        self.cooldown.invalidate();
        self.cooldown_percentage.invalidate();
        self.intensity.invalidate();
    }

    /// Whether the last command is still running at `now`.
    pub fn is_active_at(&self, now: Instant) -> bool {
        match self.last_executed {
            Some(t) => now < t + self.last_duration,
            None => false,
        }
    }

    /// End of the cooldown window: `last_executed + duration + cooldown`.
    pub fn cooldown_ends_at(&self, cooldown: Duration) -> Option<Instant> {
        self.last_executed.map(|t| t + self.last_duration + cooldown)
    }

    /// Whether the group is inside its cooldown window (and no longer
    /// active) at `now`.
    pub fn is_on_cooldown_at(&self, now: Instant, cooldown: Duration) -> bool {
        match self.cooldown_ends_at(cooldown) {
            Some(end) => !self.is_active_at(now) && now < end,
            None => false,
        }
    }

    /// Remaining cooldown as a fraction, 1.0 right after the command ends
    /// and decaying to 0.0.
    pub fn cooldown_fraction_at(&self, now: Instant, cooldown: Duration) -> f32 {
        if cooldown.is_zero() || !self.is_on_cooldown_at(now, cooldown) {
            return 0.0;
        }
        let end = match self.cooldown_ends_at(cooldown) {
            Some(e) => e,
            None => return 0.0,
        };
        let remaining = end.saturating_duration_since(now);
        (remaining.as_secs_f32() / cooldown.as_secs_f32()).clamp(0.0, 1.0)
    }
}

/// Build the runtime map from the configured group set, plus the synthetic
/// "All" group under the nil id.
pub fn build_program_groups(config: &Config) -> HashMap<Uuid, ProgramGroup> {
    let mut map = HashMap::with_capacity(config.groups.len() + 1);
    map.insert(
        Uuid::nil(),
        ProgramGroup::new(Uuid::nil(), ALL_GROUP_NAME, None),
    );
    for group in &config.groups {
        if group.id.is_nil() {
            log::warn!("skipping configured group {:?} with reserved nil id", group.name);
            continue;
        }
        map.insert(
            group.id,
            ProgramGroup::new(group.id, group.name.clone(), Some(group.clone())),
        );
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn all_group_is_always_present() {
        let map = build_program_groups(&Config::default());
        let all = map.get(&Uuid::nil()).expect("nil group");
        assert_eq!(all.name, ALL_GROUP_NAME);
        assert!(all.members().is_none());
    }

    #[test]
    fn configured_groups_get_unique_entries() {
        let mut config = Config::default();
        config.groups.push(Group {
            name: "Leg".to_string(),
            ..Group::default()
        });
        config.groups.push(Group {
            name: "Arm".to_string(),
            ..Group::default()
        });
        let map = build_program_groups(&config);
        assert_eq!(map.len(), 3);
        let names: Vec<_> = map.values().map(|g| g.name.as_str()).collect();
        assert!(names.contains(&"Leg") && names.contains(&"Arm"));
    }

    #[test]
    fn cooldown_window_math() {
        let mut group = ProgramGroup::new(Uuid::nil(), "All", None);
        let now = Instant::now();
        let cooldown = Duration::from_millis(5000);

        assert!(!group.is_active_at(now));
        assert!(!group.is_on_cooldown_at(now, cooldown));

        group.last_executed = Some(now);
        group.last_duration = Duration::from_millis(1000);

        assert!(group.is_active_at(now + Duration::from_millis(500)));
        assert!(!group.is_on_cooldown_at(now + Duration::from_millis(500), cooldown));

        let cooling = now + Duration::from_millis(2000);
        assert!(!group.is_active_at(cooling));
        assert!(group.is_on_cooldown_at(cooling, cooldown));
        assert!(group.cooldown_fraction_at(cooling, cooldown) > 0.0);

        // Past lastExecuted + duration + cooldown both derived values drop.
        let done = now + Duration::from_millis(6001);
        assert!(!group.is_active_at(done));
        assert!(!group.is_on_cooldown_at(done, cooldown));
        assert_eq!(group.cooldown_fraction_at(done, cooldown), 0.0);
    }

    #[test]
    fn reset_clears_physbone_state() {
        let mut group = ProgramGroup::new(Uuid::new_v4(), "Leg", None);
        group.is_grabbed = true;
        group.last_stretch = 0.7;
        group.trigger_method = TriggerMethod::Manual;
        group.reset();
        assert!(!group.is_grabbed);
        assert_eq!(group.last_stretch, 0.0);
        assert_eq!(group.trigger_method, TriggerMethod::None);
    }
}
