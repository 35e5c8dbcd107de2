//! Live behavior/group configuration and the config ownership boundary
//!
//! The core never persists anything itself: it reads current values and
//! writes validated mutations back through [`ConfigStore`], whose `save`
//! trigger invokes whatever saver the embedding application installed.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock, RwLockReadGuard};
use uuid::Uuid;

/// Action mapped to a physbone interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PhysboneAction {
    #[default]
    None,
    Shock,
    Vibrate,
    Sound,
}

/// Global trigger behavior, overridable per group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// Pick a random intensity in `[intensity_min, intensity_max]` instead
    /// of `fixed_intensity`.
    pub random_intensity: bool,
    pub random_duration: bool,
    /// Random durations are rounded to multiples of this step.
    pub random_duration_step_ms: u64,
    pub intensity_min: u8,
    pub intensity_max: u8,
    pub fixed_intensity: u8,
    pub duration_min_ms: u64,
    pub duration_max_ms: u64,
    pub fixed_duration_ms: u64,
    /// How long a manual trigger must be held before it fires.
    pub hold_time_ms: u64,
    pub cooldown_time_ms: u64,
    /// Continuous action while a physbone is grabbed.
    pub while_bone_held: PhysboneAction,
    /// Action fired when a stretched physbone is released.
    pub bone_release_action: PhysboneAction,
    /// When set, a stretched release fires a normally randomized shock and
    /// `bone_release_action` is not consulted.
    pub random_on_release: bool,
    /// Caps how long the while-held action may keep running after a grab.
    pub bone_held_duration_limit_ms: Option<u64>,
    pub disable_while_afk: bool,
    /// Press-and-release `/input/Voice` before dispatching while muted.
    pub force_unmute: bool,
    /// Global kill switch. Nothing dispatches while set.
    pub paused: bool,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            random_intensity: true,
            random_duration: false,
            random_duration_step_ms: 100,
            intensity_min: 1,
            intensity_max: 50,
            fixed_intensity: 50,
            duration_min_ms: 1000,
            duration_max_ms: 5000,
            fixed_duration_ms: 2000,
            hold_time_ms: 250,
            cooldown_time_ms: 5000,
            while_bone_held: PhysboneAction::Vibrate,
            bone_release_action: PhysboneAction::Shock,
            random_on_release: false,
            bone_held_duration_limit_ms: None,
            disable_while_afk: true,
            force_unmute: false,
            paused: false,
        }
    }
}

/// Chatbox feedback settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatboxConfig {
    pub enabled: bool,
    /// Prepended to every message.
    pub prefix: String,
    /// Minimum interval between chatbox sends.
    pub timeout_ms: u64,
    /// Dispatch announcement. Placeholders: `{GroupName}`, `{Intensity}`,
    /// `{Duration}` (seconds).
    pub template: String,
    /// Per-outcome notices; an empty string disables that notice.
    pub killswitch_notice: String,
    pub paused_notice: String,
    pub afk_notice: String,
    pub cooldown_notice: String,
}

impl Default for ChatboxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prefix: "[ShockOsc] ".to_string(),
            timeout_ms: 5000,
            template: "{GroupName} {Intensity}%:{Duration}s".to_string(),
            killswitch_notice: "killswitch active".to_string(),
            paused_notice: String::new(),
            afk_notice: String::new(),
            cooldown_notice: String::new(),
        }
    }
}

/// OSC endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OscConfig {
    /// Instance name used for the mDNS advertisement.
    pub service_name: String,
    /// Route chatbox messages through a local HOSCY relay instead of the
    /// game's chatbox address.
    pub hoscy: bool,
    pub hoscy_send_port: u16,
}

impl Default for OscConfig {
    fn default() -> Self {
        Self {
            service_name: "ShockOsc".to_string(),
            hoscy: false,
            hoscy_send_port: 9001,
        }
    }
}

/// A user-configured control target. Replaced wholesale on config change,
/// never mutated field by field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Group {
    pub id: Uuid,
    pub name: String,
    /// Member shocker ids.
    pub shockers: Vec<Uuid>,

    pub override_intensity: bool,
    pub random_intensity: bool,
    pub intensity_min: u8,
    pub intensity_max: u8,
    pub fixed_intensity: u8,

    pub override_duration: bool,
    pub random_duration: bool,
    pub duration_min_ms: u64,
    pub duration_max_ms: u64,
    pub fixed_duration_ms: u64,

    pub override_cooldown: bool,
    pub cooldown_time_ms: u64,

    pub override_physbone: bool,
    pub while_bone_held: PhysboneAction,
    pub bone_release_action: PhysboneAction,
    pub random_on_release: bool,

    pub override_held_duration_limit: bool,
    pub bone_held_duration_limit_ms: Option<u64>,
}

impl Default for Group {
    fn default() -> Self {
        let behavior = BehaviorConfig::default();
        Self {
            id: Uuid::new_v4(),
            name: String::new(),
            shockers: Vec::new(),
            override_intensity: false,
            random_intensity: behavior.random_intensity,
            intensity_min: behavior.intensity_min,
            intensity_max: behavior.intensity_max,
            fixed_intensity: behavior.fixed_intensity,
            override_duration: false,
            random_duration: behavior.random_duration,
            duration_min_ms: behavior.duration_min_ms,
            duration_max_ms: behavior.duration_max_ms,
            fixed_duration_ms: behavior.fixed_duration_ms,
            override_cooldown: false,
            cooldown_time_ms: behavior.cooldown_time_ms,
            override_physbone: false,
            while_bone_held: behavior.while_bone_held,
            bone_release_action: behavior.bone_release_action,
            random_on_release: behavior.random_on_release,
            override_held_duration_limit: false,
            bone_held_duration_limit_ms: None,
        }
    }
}

/// Intensity/duration resolution inputs after group overrides are applied.
#[derive(Debug, Clone, Copy)]
pub struct EffectiveBehavior {
    pub random_intensity: bool,
    pub intensity_min: u8,
    pub intensity_max: u8,
    pub fixed_intensity: u8,
    pub random_duration: bool,
    pub random_duration_step_ms: u64,
    pub duration_min_ms: u64,
    pub duration_max_ms: u64,
    pub fixed_duration_ms: u64,
    pub cooldown_time_ms: u64,
    pub while_bone_held: PhysboneAction,
    pub bone_release_action: PhysboneAction,
    pub random_on_release: bool,
    pub bone_held_duration_limit_ms: Option<u64>,
}

impl BehaviorConfig {
    /// Resolve the effective behavior for a group. Absent overrides fall
    /// back to the global values.
    pub fn for_group(&self, group: Option<&Group>) -> EffectiveBehavior {
        let mut eff = EffectiveBehavior {
            random_intensity: self.random_intensity,
            intensity_min: self.intensity_min,
            intensity_max: self.intensity_max,
            fixed_intensity: self.fixed_intensity,
            random_duration: self.random_duration,
            random_duration_step_ms: self.random_duration_step_ms,
            duration_min_ms: self.duration_min_ms,
            duration_max_ms: self.duration_max_ms,
            fixed_duration_ms: self.fixed_duration_ms,
            cooldown_time_ms: self.cooldown_time_ms,
            while_bone_held: self.while_bone_held,
            bone_release_action: self.bone_release_action,
            random_on_release: self.random_on_release,
            bone_held_duration_limit_ms: self.bone_held_duration_limit_ms,
        };
        let Some(group) = group else {
            return eff;
        };
        if group.override_intensity {
            eff.random_intensity = group.random_intensity;
            eff.intensity_min = group.intensity_min;
            eff.intensity_max = group.intensity_max;
            eff.fixed_intensity = group.fixed_intensity;
        }
        if group.override_duration {
            eff.random_duration = group.random_duration;
            eff.duration_min_ms = group.duration_min_ms;
            eff.duration_max_ms = group.duration_max_ms;
            eff.fixed_duration_ms = group.fixed_duration_ms;
        }
        if group.override_cooldown {
            eff.cooldown_time_ms = group.cooldown_time_ms;
        }
        if group.override_physbone {
            eff.while_bone_held = group.while_bone_held;
            eff.bone_release_action = group.bone_release_action;
            eff.random_on_release = group.random_on_release;
        }
        if group.override_held_duration_limit {
            eff.bone_held_duration_limit_ms = group.bone_held_duration_limit_ms;
        }
        eff
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub behavior: BehaviorConfig,
    pub chatbox: ChatboxConfig,
    pub osc: OscConfig,
    pub groups: Vec<Group>,
}

/// Saver hook invoked by [`ConfigStore::save`].
pub type SaveHook = Box<dyn Fn(&Config) + Send + Sync>;

/// Shared live configuration with an explicit save trigger and change
/// notification for observers.
pub struct ConfigStore {
    inner: RwLock<Config>,
    saver: std::sync::Mutex<Option<SaveHook>>,
    changed: watch::Sender<u64>,
}

impl ConfigStore {
    pub fn new(config: Config) -> Arc<Self> {
        let (changed, _) = watch::channel(0);
        Arc::new(Self {
            inner: RwLock::new(config),
            saver: std::sync::Mutex::new(None),
            changed,
        })
    }

    /// Install the saver invoked by [`ConfigStore::save`].
    pub fn set_saver(&self, saver: SaveHook) {
        *self.saver.lock().unwrap_or_else(|e| e.into_inner()) = Some(saver);
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, Config> {
        self.inner.read().await
    }

    pub async fn snapshot(&self) -> Config {
        self.inner.read().await.clone()
    }

    /// Mutate the live configuration in place.
    pub async fn update<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Config) -> R,
    {
        let mut guard = self.inner.write().await;
        f(&mut guard)
    }

    /// Persist through the installed saver and notify change observers.
    pub async fn save(&self) {
        let snapshot = self.snapshot().await;
        if let Some(saver) = self
            .saver
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            saver(&snapshot);
        }
        self.changed.send_modify(|gen| *gen += 1);
    }

    /// Observe config changes. The value is a generation counter.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changed.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_override_resolution() {
        let behavior = BehaviorConfig::default();
        let group = Group {
            override_intensity: true,
            intensity_min: 10,
            intensity_max: 20,
            ..Group::default()
        };

        let eff = behavior.for_group(Some(&group));
        assert_eq!(eff.intensity_min, 10);
        assert_eq!(eff.intensity_max, 20);
        // Duration override is off, so the global value wins.
        assert_eq!(eff.duration_max_ms, behavior.duration_max_ms);

        let eff = behavior.for_group(None);
        assert_eq!(eff.intensity_min, behavior.intensity_min);
    }

    #[tokio::test]
    async fn save_notifies_observers() {
        let store = ConfigStore::new(Config::default());
        let mut rx = store.subscribe();
        let before = *rx.borrow();
        store.update(|c| c.behavior.paused = true).await;
        store.save().await;
        rx.changed().await.unwrap();
        assert!(*rx.borrow() > before);
        assert!(store.read().await.behavior.paused);
    }

    #[test]
    fn config_roundtrips_through_json() {
        let mut config = Config::default();
        config.groups.push(Group {
            name: "Leg".to_string(),
            ..Group::default()
        });
        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.groups.len(), 1);
        assert_eq!(back.groups[0].name, "Leg");
    }
}
