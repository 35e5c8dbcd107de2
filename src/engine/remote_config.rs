//! In-band remote configuration
//!
//! Behavior values can be adjusted from inside the game through reserved
//! `_Config/` addresses. Values travel normalized to 0..1 over fixed
//! scales; mutations are epsilon-deduplicated (the game echoes every
//! parameter back), validated by snapping the violating range bound, then
//! persisted and announced to observers. After an avatar (re)connect the
//! whole current state is rebroadcast so the in-game menu resynchronizes.

use std::sync::Arc;

use log::{debug, info};

use crate::config::{Config, ConfigStore};
use crate::osc::transport::OscTransport;
use crate::osc::types::OscArg;

/// Scope token addressing the global behavior config.
const ALL_SCOPE: &str = "_All";

/// Normalization denominators.
const INTENSITY_SCALE: f32 = 100.0;
const DURATION_SCALE_MS: f32 = 10_000.0;
const COOLDOWN_SCALE_MS: f32 = 100_000.0;
const HOLD_TIME_SCALE_MS: f32 = 1_000.0;

const EPSILON: f32 = 1e-4;

const CONFIG_ADDRESS_PREFIX: &str = "/avatar/parameters/ShockOsc/_Config/";

pub struct RemoteConfig {
    config: Arc<ConfigStore>,
    transport: Arc<OscTransport>,
}

impl RemoteConfig {
    pub fn new(config: Arc<ConfigStore>, transport: Arc<OscTransport>) -> Self {
        Self { config, transport }
    }

    /// Handle one `_Config/` message. `segments` has one or two elements;
    /// anything else was already rejected by the parser.
    pub async fn handle(&self, segments: &[&str], arg: Option<&OscArg>) {
        let Some(arg) = arg else {
            debug!("config message without argument: {segments:?}");
            return;
        };
        match segments {
            // Legacy single-segment form: only the kill switch.
            [action] => {
                if *action == "Paused" {
                    self.apply(|c, v| toggle(&mut c.behavior.paused, v), arg.as_bool())
                        .await;
                } else {
                    debug!("ignoring legacy config address {action}");
                }
            }
            [scope, action] => {
                if *scope != ALL_SCOPE {
                    // Group-scoped configuration is part of the protocol
                    // surface but deliberately has no effect yet.
                    debug!("group-scoped config {scope}/{action} ignored");
                    return;
                }
                self.handle_all_scope(action, arg).await;
            }
            _ => debug!("malformed config address: {segments:?}"),
        }
    }

    async fn handle_all_scope(&self, action: &str, arg: &OscArg) {
        let float = arg.as_float();
        match action {
            "MinIntensity" => {
                self.apply(
                    |c, v| {
                        let b = &mut c.behavior;
                        set_scaled_u8(&mut b.intensity_min, v, INTENSITY_SCALE)
                            && snap_up_u8(b.intensity_min, &mut b.intensity_max)
                    },
                    float,
                )
                .await
            }
            "MaxIntensity" => {
                self.apply(
                    |c, v| {
                        let b = &mut c.behavior;
                        set_scaled_u8(&mut b.intensity_max, v, INTENSITY_SCALE)
                            && snap_down_u8(&mut b.intensity_min, b.intensity_max)
                    },
                    float,
                )
                .await
            }
            "FixedIntensity" => {
                self.apply(
                    |c, v| set_scaled_u8(&mut c.behavior.fixed_intensity, v, INTENSITY_SCALE),
                    float,
                )
                .await
            }
            "MinDuration" => {
                self.apply(
                    |c, v| {
                        let b = &mut c.behavior;
                        set_scaled_ms(&mut b.duration_min_ms, v, DURATION_SCALE_MS)
                            && snap_up_ms(b.duration_min_ms, &mut b.duration_max_ms)
                    },
                    float,
                )
                .await
            }
            "MaxDuration" => {
                self.apply(
                    |c, v| {
                        let b = &mut c.behavior;
                        set_scaled_ms(&mut b.duration_max_ms, v, DURATION_SCALE_MS)
                            && snap_down_ms(&mut b.duration_min_ms, b.duration_max_ms)
                    },
                    float,
                )
                .await
            }
            "FixedDuration" => {
                self.apply(
                    |c, v| set_scaled_ms(&mut c.behavior.fixed_duration_ms, v, DURATION_SCALE_MS),
                    float,
                )
                .await
            }
            "CooldownTime" => {
                self.apply(
                    |c, v| set_scaled_ms(&mut c.behavior.cooldown_time_ms, v, COOLDOWN_SCALE_MS),
                    float,
                )
                .await
            }
            "HoldTime" => {
                self.apply(
                    |c, v| set_scaled_ms(&mut c.behavior.hold_time_ms, v, HOLD_TIME_SCALE_MS),
                    float,
                )
                .await
            }
            "RandomIntensity" => {
                self.apply(
                    |c, v| toggle(&mut c.behavior.random_intensity, v),
                    arg.as_bool(),
                )
                .await
            }
            "RandomDuration" => {
                self.apply(
                    |c, v| toggle(&mut c.behavior.random_duration, v),
                    arg.as_bool(),
                )
                .await
            }
            "Paused" => {
                self.apply(|c, v| toggle(&mut c.behavior.paused, v), arg.as_bool())
                    .await
            }
            other => debug!("unknown config action {other}"),
        }
    }

    /// Apply one mutation; persist and notify only when it changed.
    async fn apply<T, F>(&self, mutate: F, value: T)
    where
        F: FnOnce(&mut Config, T) -> bool,
    {
        let changed = self.config.update(|c| mutate(c, value)).await;
        if changed {
            info!("behavior config updated via remote config");
            self.config.save().await;
        }
    }

    /// Republish the full current state so the remote menu resynchronizes.
    pub async fn broadcast_all(&self) {
        let behavior = self.config.read().await.behavior.clone();
        let send_float = |action: &str, value: f32| {
            let address = format!("{CONFIG_ADDRESS_PREFIX}{ALL_SCOPE}/{action}");
            self.transport.send_game(address, vec![OscArg::Float(value)]);
        };
        send_float("MinIntensity", behavior.intensity_min as f32 / INTENSITY_SCALE);
        send_float("MaxIntensity", behavior.intensity_max as f32 / INTENSITY_SCALE);
        send_float(
            "FixedIntensity",
            behavior.fixed_intensity as f32 / INTENSITY_SCALE,
        );
        send_float(
            "MinDuration",
            behavior.duration_min_ms as f32 / DURATION_SCALE_MS,
        );
        send_float(
            "MaxDuration",
            behavior.duration_max_ms as f32 / DURATION_SCALE_MS,
        );
        send_float(
            "FixedDuration",
            behavior.fixed_duration_ms as f32 / DURATION_SCALE_MS,
        );
        send_float(
            "CooldownTime",
            behavior.cooldown_time_ms as f32 / COOLDOWN_SCALE_MS,
        );
        send_float("HoldTime", behavior.hold_time_ms as f32 / HOLD_TIME_SCALE_MS);

        let send_bool = |action: &str, value: bool| {
            let address = format!("{CONFIG_ADDRESS_PREFIX}{ALL_SCOPE}/{action}");
            self.transport.send_game(address, vec![OscArg::Bool(value)]);
        };
        send_bool("RandomIntensity", behavior.random_intensity);
        send_bool("RandomDuration", behavior.random_duration);
        send_bool("Paused", behavior.paused);
    }
}

/// Write a normalized float into a 0..=100 field. Returns whether it
/// actually changed (epsilon on the normalized value).
fn set_scaled_u8(field: &mut u8, normalized: f32, scale: f32) -> bool {
    let current = *field as f32 / scale;
    if (current - normalized).abs() < EPSILON {
        return false;
    }
    *field = (normalized.clamp(0.0, 1.0) * scale).round() as u8;
    true
}

fn set_scaled_ms(field: &mut u64, normalized: f32, scale: f32) -> bool {
    let current = *field as f32 / scale;
    if (current - normalized).abs() < EPSILON {
        return false;
    }
    *field = (normalized.clamp(0.0, 1.0) * scale).round() as u64;
    true
}

fn toggle(field: &mut bool, value: bool) -> bool {
    if *field == value {
        return false;
    }
    *field = value;
    true
}

// Range repair: the violating bound is snapped, never rejected. The `&&`
// callers rely on these returning true so a snap still counts as a change.
fn snap_up_u8(min: u8, max: &mut u8) -> bool {
    if *max < min {
        *max = min;
    }
    true
}

fn snap_down_u8(min: &mut u8, max: u8) -> bool {
    if *min > max {
        *min = max;
    }
    true
}

fn snap_up_ms(min: u64, max: &mut u64) -> bool {
    if *max < min {
        *max = min;
    }
    true
}

fn snap_down_ms(min: &mut u64, max: u64) -> bool {
    if *min > max {
        *min = max;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    async fn remote() -> (RemoteConfig, Arc<ConfigStore>) {
        let store = ConfigStore::new(Config::default());
        let transport = OscTransport::new(Arc::clone(&store)).await.unwrap();
        (
            RemoteConfig::new(Arc::clone(&store), transport),
            store,
        )
    }

    #[tokio::test]
    async fn min_above_max_snaps_max_up() {
        let (rc, store) = remote().await;
        store
            .update(|c| {
                c.behavior.intensity_min = 5;
                c.behavior.intensity_max = 10;
            })
            .await;

        rc.handle(&["_All", "MinIntensity"], Some(&OscArg::Float(0.2)))
            .await;

        let behavior = store.read().await.behavior.clone();
        assert_eq!(behavior.intensity_min, 20);
        assert_eq!(behavior.intensity_max, 20, "max must snap up, not stay inconsistent");
    }

    #[tokio::test]
    async fn max_below_min_snaps_min_down() {
        let (rc, store) = remote().await;
        store
            .update(|c| {
                c.behavior.duration_min_ms = 3000;
                c.behavior.duration_max_ms = 5000;
            })
            .await;

        rc.handle(&["_All", "MaxDuration"], Some(&OscArg::Float(0.1)))
            .await;

        let behavior = store.read().await.behavior.clone();
        assert_eq!(behavior.duration_max_ms, 1000);
        assert_eq!(behavior.duration_min_ms, 1000);
    }

    #[tokio::test]
    async fn unchanged_values_do_not_trigger_a_save() {
        let (rc, store) = remote().await;
        let mut changes = store.subscribe();
        let before = *changes.borrow_and_update();

        // Echo of the current value: intensity_min default is 1 → 0.01.
        rc.handle(&["_All", "MinIntensity"], Some(&OscArg::Float(0.01)))
            .await;
        assert_eq!(*changes.borrow_and_update(), before, "echo must not persist");

        rc.handle(&["_All", "MinIntensity"], Some(&OscArg::Float(0.3)))
            .await;
        assert!(*changes.borrow_and_update() > before);
    }

    #[tokio::test]
    async fn legacy_single_segment_controls_the_kill_switch() {
        let (rc, store) = remote().await;
        rc.handle(&["Paused"], Some(&OscArg::Bool(true))).await;
        assert!(store.read().await.behavior.paused);
        rc.handle(&["Paused"], Some(&OscArg::Bool(false))).await;
        assert!(!store.read().await.behavior.paused);
    }

    #[tokio::test]
    async fn group_scope_is_a_no_op() {
        let (rc, store) = remote().await;
        let before = store.snapshot().await.behavior;
        rc.handle(&["Leg", "MinIntensity"], Some(&OscArg::Float(0.9)))
            .await;
        let after = store.snapshot().await.behavior;
        assert_eq!(before.intensity_min, after.intensity_min);
    }

    #[tokio::test]
    async fn toggles_apply() {
        let (rc, store) = remote().await;
        rc.handle(&["_All", "RandomDuration"], Some(&OscArg::Bool(true)))
            .await;
        assert!(store.read().await.behavior.random_duration);
    }
}
