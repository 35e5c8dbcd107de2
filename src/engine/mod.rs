//! Trigger and safety engine
//!
//! Owns every loop and all shared runtime state: the group map, the
//! parameter caches, the AFK/mute flags. Inbound parameter traffic arms
//! per-group triggers; a 20 ms check loop evaluates them behind the safety
//! gates and dispatches commands; a 300 ms publish loop pushes derived
//! state back into the parameter space.

pub mod address;
pub mod preconditions;
pub mod remote_config;
pub mod scaling;

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use log::{debug, info, warn};
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::chatbox::Chatbox;
use crate::config::{ConfigStore, PhysboneAction};
use crate::groups::{self, ControlType, ProgramGroup, TriggerMethod, SHOCKOSC_PREFIX};
use crate::live::{ControlApi, ControlCommand, LiveControlManager};
use crate::osc::params::ChangeTracked;
use crate::osc::transport::OscTransport;
use crate::osc::types::{OscArg, OscMessage};
use crate::oscquery::discovery::{DiscoveryEvent, ParameterSnapshot};

use self::address::{GroupAction, ParsedAddress, ANY_PSEUDO_GROUP};
use self::preconditions::CheckResult;
use self::remote_config::RemoteConfig;

const CHECK_INTERVAL: Duration = Duration::from_millis(20);
const PUBLISH_INTERVAL: Duration = Duration::from_millis(300);
/// Damping floor for while-held re-issues.
const HELD_ACTION_MIN_INTERVAL: Duration = Duration::from_millis(100);
/// `NextDuration` arrives normalized over this scale.
const NEXT_DURATION_SCALE_MS: f32 = 10_000.0;

const VOICE_ADDRESS: &str = "/input/Voice";

/// A dispatch decision taken under the group lock, executed after it is
/// released.
struct PendingCommand {
    group_name: String,
    members: Option<Vec<Uuid>>,
    control_type: ControlType,
    intensity: u8,
    duration: Duration,
    announce: bool,
}

/// Aggregate outputs across all groups.
struct AnyParams {
    active: ChangeTracked<bool>,
    cooldown: ChangeTracked<bool>,
}

impl AnyParams {
    fn new() -> Self {
        Self {
            active: ChangeTracked::new(format!("{SHOCKOSC_PREFIX}{ANY_PSEUDO_GROUP}_Active"), false),
            cooldown: ChangeTracked::new(
                format!("{SHOCKOSC_PREFIX}{ANY_PSEUDO_GROUP}_Cooldown"),
                false,
            ),
        }
    }
}

pub struct Engine {
    config: Arc<ConfigStore>,
    transport: Arc<OscTransport>,
    live: Arc<LiveControlManager>,
    control: Arc<dyn ControlApi>,
    chatbox: Arc<Chatbox>,
    remote_config: RemoteConfig,
    groups: RwLock<HashMap<Uuid, ProgramGroup>>,
    aggregates: Mutex<AnyParams>,
    /// Parameters under our namespace, cached from the last tree fetch.
    shock_params: RwLock<HashMap<String, serde_json::Value>>,
    /// Other avatar-scoped parameters; kept for inspection only.
    avatar_params: RwLock<HashMap<String, serde_json::Value>>,
    avatar_id: RwLock<Option<String>>,
    afk: AtomicBool,
    muted: AtomicBool,
    refetch: std::sync::Mutex<Option<mpsc::UnboundedSender<()>>>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    pub fn new(
        config: Arc<ConfigStore>,
        transport: Arc<OscTransport>,
        live: Arc<LiveControlManager>,
        chatbox: Arc<Chatbox>,
        shutdown: watch::Sender<bool>,
    ) -> Arc<Self> {
        let remote_config = RemoteConfig::new(Arc::clone(&config), Arc::clone(&transport));
        let control = live.api();
        Arc::new(Self {
            config,
            transport,
            live,
            control,
            chatbox,
            remote_config,
            groups: RwLock::new(HashMap::new()),
            aggregates: Mutex::new(AnyParams::new()),
            shock_params: RwLock::new(HashMap::new()),
            avatar_params: RwLock::new(HashMap::new()),
            avatar_id: RwLock::new(None),
            afk: AtomicBool::new(false),
            muted: AtomicBool::new(false),
            refetch: std::sync::Mutex::new(None),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Build the group map and spawn every loop. `discovery` carries the
    /// event stream plus the refetch handle when a discovery service is
    /// attached; headless embedders may run without one.
    pub async fn start(
        self: &Arc<Self>,
        discovery: Option<(mpsc::UnboundedReceiver<DiscoveryEvent>, mpsc::UnboundedSender<()>)>,
    ) {
        self.rebuild_groups().await;

        let mut tasks = self.tasks.lock().await;
        let shutdown_rx = self.shutdown.subscribe();

        tasks.extend(self.transport.spawn_senders(shutdown_rx.clone()));
        tasks.push(self.chatbox.spawn_pacing_loop(shutdown_rx.clone()));

        if let Some((events, refetch)) = discovery {
            *self.refetch.lock().unwrap_or_else(|e| e.into_inner()) = Some(refetch);
            tasks.push(self.spawn_discovery_loop(events, shutdown_rx.clone()));
        }

        tasks.push(self.spawn_receive_loop(shutdown_rx.clone()));
        tasks.push(self.spawn_check_loop(shutdown_rx.clone()));
        tasks.push(self.spawn_publish_loop(shutdown_rx.clone()));
        tasks.push(self.spawn_config_watch_loop(shutdown_rx));
        info!("engine started with {} groups", self.groups.read().await.len());
    }

    /// Cooperative shutdown: signal every loop and join them.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let mut tasks = self.tasks.lock().await;
        for result in futures::future::join_all(tasks.drain(..)).await {
            if let Err(e) = result {
                warn!("loop ended abnormally: {e}");
            }
        }
        info!("engine stopped");
    }

    fn spawn_receive_loop(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    _ = shutdown.changed() => break,
                    msg = this.transport.receive_game_message() => msg,
                };
                this.handle_message(msg).await;
            }
        })
    }

    fn spawn_check_loop(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CHECK_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = interval.tick() => {}
                }
                // A failing tick must not kill the loop.
                let tick = AssertUnwindSafe(this.check_tick()).catch_unwind();
                if tick.await.is_err() {
                    warn!("check tick panicked, continuing on the next interval");
                }
            }
        })
    }

    fn spawn_publish_loop(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PUBLISH_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = interval.tick() => {}
                }
                let tick = AssertUnwindSafe(this.publish_tick()).catch_unwind();
                if tick.await.is_err() {
                    warn!("publish tick panicked, continuing on the next interval");
                }
            }
        })
    }

    fn spawn_discovery_loop(
        self: &Arc<Self>,
        mut events: mpsc::UnboundedReceiver<DiscoveryEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = shutdown.changed() => break,
                    ev = events.recv() => match ev {
                        Some(ev) => ev,
                        None => break,
                    },
                };
                match event {
                    DiscoveryEvent::GameFound { host, osc_port } => {
                        let receive_port = this.transport.local_port();
                        if let Err(e) = this
                            .transport
                            .create_game_connection(host, receive_port, osc_port)
                            .await
                        {
                            warn!("failed to point transport at {host}:{osc_port}: {e}");
                        }
                    }
                    DiscoveryEvent::Snapshot(snapshot) => this.on_snapshot(snapshot).await,
                }
            }
        })
    }

    /// Rebuild the group map when the configured group set changes; plain
    /// behavior tweaks (remote config) leave runtime state untouched.
    fn spawn_config_watch_loop(
        self: &Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let mut changes = self.config.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                if this.groups_out_of_date().await {
                    info!("group configuration changed, rebuilding runtime groups");
                    this.rebuild_groups().await;
                }
            }
        })
    }

    async fn groups_out_of_date(&self) -> bool {
        let configured = self.config.read().await.groups.clone();
        let groups = self.groups.read().await;
        if groups.len() != configured.len() + 1 {
            return true;
        }
        configured.iter().any(|g| {
            groups
                .get(&g.id)
                .map_or(true, |pg| pg.config.as_ref() != Some(g))
        })
    }

    async fn rebuild_groups(&self) {
        let snapshot = self.config.snapshot().await;
        *self.groups.write().await = groups::build_program_groups(&snapshot);
    }

    /// Route one inbound OSC message.
    pub async fn handle_message(&self, msg: OscMessage) {
        match address::parse(&msg.address) {
            ParsedAddress::AvatarChange => {
                let id = msg.arg().and_then(|a| a.as_str()).map(str::to_string);
                self.on_avatar_change(id).await;
            }
            ParsedAddress::Afk => {
                let afk = msg.arg().map_or(false, OscArg::as_bool);
                self.afk.store(afk, Ordering::Relaxed);
                debug!("afk: {afk}");
            }
            ParsedAddress::MuteSelf => {
                let muted = msg.arg().map_or(false, OscArg::as_bool);
                self.muted.store(muted, Ordering::Relaxed);
            }
            ParsedAddress::Config { segments } => {
                self.remote_config.handle(&segments, msg.arg()).await;
            }
            ParsedAddress::Group { name, action } => {
                self.handle_group_param(name, action, msg.arg()).await;
            }
            ParsedAddress::AvatarParam(_) => {
                self.avatar_params
                    .write()
                    .await
                    .insert(msg.address.clone(), arg_to_json(msg.arg()));
            }
            ParsedAddress::Other => {}
        }
    }

    async fn handle_group_param(&self, name: &str, action: GroupAction, arg: Option<&OscArg>) {
        if action.is_output_only() {
            return;
        }
        if name == ANY_PSEUDO_GROUP {
            return; // output-only pseudo-group
        }
        let behavior = self.config.read().await.behavior.clone();
        let afk = self.afk.load(Ordering::Relaxed);
        let now = Instant::now();

        let mut pending = Vec::new();
        let mut denied: Vec<CheckResult> = Vec::new();
        {
            let mut groups = self.groups.write().await;
            let Some(group) = groups.values_mut().find(|g| g.name == name) else {
                warn!("parameter for unknown group {name:?} ignored");
                return;
            };
            let eff = behavior.for_group(group.config.as_ref());

            match action {
                GroupAction::Trigger => {
                    if arg.map_or(false, OscArg::as_bool) {
                        group.trigger_method = TriggerMethod::Manual;
                        group.last_active = Some(now);
                    } else {
                        group.trigger_method = TriggerMethod::None;
                    }
                }
                GroupAction::Stretch => {
                    group.last_stretch = arg.map_or(0.0, OscArg::as_float).clamp(0.0, 1.0);
                }
                GroupAction::IsGrabbed => {
                    let grabbed = arg.map_or(false, OscArg::as_bool);
                    if grabbed && !group.is_grabbed {
                        group.is_grabbed = true;
                        group.grabbed_at = Some(now);
                        group.physbone_grab_limit =
                            eff.bone_held_duration_limit_ms.map(Duration::from_millis);
                    } else if !grabbed && group.is_grabbed {
                        group.is_grabbed = false;
                        group.grabbed_at = None;
                        if group.last_stretch > 0.0 {
                            group.trigger_method = TriggerMethod::PhysBoneRelease;
                            group.last_active = Some(now);
                        } else if eff.while_bone_held != PhysboneAction::None {
                            // Released without stretch: make sure the held
                            // action is not left running on the devices.
                            pending.push(PendingCommand {
                                group_name: group.name.clone(),
                                members: group.members().map(<[Uuid]>::to_vec),
                                control_type: ControlType::Stop,
                                intensity: 0,
                                duration: Duration::ZERO,
                                announce: false,
                            });
                        }
                    }
                }
                GroupAction::IShock | GroupAction::IVibrate | GroupAction::ISound => {
                    if arg.map_or(false, OscArg::as_bool) {
                        let control_type = match action {
                            GroupAction::IShock => ControlType::Shock,
                            GroupAction::IVibrate => ControlType::Vibrate,
                            _ => ControlType::Sound,
                        };
                        let outcome = preconditions::check(group, &behavior, afk, now);
                        if outcome.is_success() {
                            let intensity = scaling::resolve_intensity(&eff);
                            let duration = scaling::resolve_duration(&eff);
                            pending.push(arm_command(group, control_type, intensity, duration, now));
                        } else {
                            denied.push(outcome);
                        }
                    }
                }
                GroupAction::CShock | GroupAction::CVibrate | GroupAction::CSound => {
                    let value = arg.map_or(0.0, OscArg::as_float).clamp(0.0, 1.0);
                    if value > 0.0 {
                        group.concurrent_intensity = value;
                        group.concurrent_type = match action {
                            GroupAction::CShock => ControlType::Shock,
                            GroupAction::CVibrate => ControlType::Vibrate,
                            _ => ControlType::Sound,
                        };
                    } else {
                        // The check loop emits the single Stop frame.
                        group.concurrent_intensity = 0.0;
                    }
                }
                GroupAction::NextIntensity => {
                    let value = arg.map_or(0.0, OscArg::as_float);
                    group.next_intensity = (value > 0.0)
                        .then(|| (value.clamp(0.0, 1.0) * 100.0).round() as u8);
                }
                GroupAction::NextDuration => {
                    let value = arg.map_or(0.0, OscArg::as_float);
                    group.next_duration = (value > 0.0).then(|| {
                        Duration::from_millis(
                            (value.clamp(0.0, 1.0) * NEXT_DURATION_SCALE_MS).round() as u64,
                        )
                    });
                }
                GroupAction::Cooldown
                | GroupAction::Active
                | GroupAction::CooldownPercentage
                | GroupAction::Intensity => {}
            }
        }
        for outcome in denied {
            self.chatbox.announce_denied(outcome).await;
        }
        self.execute_pending(pending).await;
    }

    /// One pass of the 20 ms safety/trigger loop.
    async fn check_tick(&self) {
        let behavior = self.config.read().await.behavior.clone();
        let afk = self.afk.load(Ordering::Relaxed);
        let now = Instant::now();

        let mut pending = Vec::new();
        let mut denied: Vec<CheckResult> = Vec::new();
        let mut frames: Vec<(Option<Vec<Uuid>>, ControlType, u8)> = Vec::new();
        {
            let mut groups = self.groups.write().await;
            for group in groups.values_mut() {
                let eff = behavior.for_group(group.config.as_ref());
                let members = group.members().map(<[Uuid]>::to_vec);

                // Continuous streaming: frames bypass cooldown bookkeeping
                // but not the safety gates; returning to zero emits exactly
                // one Stop frame.
                if group.concurrent_intensity > 0.0 {
                    if preconditions::check(group, &behavior, afk, now).is_success() {
                        frames.push((
                            members.clone(),
                            group.concurrent_type,
                            scaling::scaled_intensity(&eff, group.concurrent_intensity),
                        ));
                    }
                } else if group.concurrent_type != ControlType::Stop {
                    frames.push((members.clone(), ControlType::Stop, 0));
                    group.concurrent_type = ControlType::Stop;
                }

                // While a physbone is held, keep re-issuing the held action
                // at a damped rate, scaled by the live stretch.
                if group.is_grabbed
                    && group.trigger_method == TriggerMethod::None
                    && group.last_stretch > 0.0
                {
                    if let Some(control_type) = physbone_control_type(eff.while_bone_held) {
                        let within_limit = match (group.physbone_grab_limit, group.grabbed_at) {
                            (Some(limit), Some(start)) => now < start + limit,
                            _ => true,
                        };
                        let damped = group
                            .last_vibration
                            .map_or(true, |t| now >= t + HELD_ACTION_MIN_INTERVAL);
                        if within_limit
                            && damped
                            && preconditions::check(group, &behavior, afk, now).is_success()
                        {
                            group.last_vibration = Some(now);
                            frames.push((
                                members.clone(),
                                control_type,
                                scaling::scaled_intensity(&eff, group.last_stretch),
                            ));
                        }
                    }
                }

                match group.trigger_method {
                    TriggerMethod::Manual => {
                        let hold = Duration::from_millis(behavior.hold_time_ms);
                        let held_long_enough = group
                            .last_active
                            .map_or(false, |t| now >= t + hold);
                        if !held_long_enough {
                            continue; // still holding
                        }
                        let outcome = preconditions::check(group, &behavior, afk, now);
                        if outcome.is_success() {
                            let intensity = scaling::resolve_intensity(&eff);
                            let duration = scaling::resolve_duration(&eff);
                            pending.push(arm_command(
                                group,
                                ControlType::Shock,
                                intensity,
                                duration,
                                now,
                            ));
                        } else {
                            denied.push(outcome);
                        }
                    }
                    TriggerMethod::PhysBoneRelease => {
                        let outcome = preconditions::check(group, &behavior, afk, now);
                        if outcome.is_success() {
                            if eff.random_on_release {
                                let intensity = scaling::resolve_intensity(&eff);
                                let duration = scaling::resolve_duration(&eff);
                                pending.push(arm_command(
                                    group,
                                    ControlType::Shock,
                                    intensity,
                                    duration,
                                    now,
                                ));
                            } else if let Some(control_type) =
                                physbone_control_type(eff.bone_release_action)
                            {
                                let intensity =
                                    scaling::scaled_intensity(&eff, group.last_stretch);
                                let duration = scaling::resolve_duration(&eff);
                                pending.push(arm_command(
                                    group,
                                    control_type,
                                    intensity,
                                    duration,
                                    now,
                                ));
                            } else {
                                group.trigger_method = TriggerMethod::None;
                            }
                        } else {
                            denied.push(outcome);
                        }
                        group.last_stretch = 0.0;
                    }
                    TriggerMethod::None => {}
                }
            }
        }

        for (members, control_type, intensity) in frames {
            self.live
                .send_frame(members.as_deref(), control_type, intensity)
                .await;
        }
        for outcome in denied {
            self.chatbox.announce_denied(outcome).await;
        }
        self.execute_pending(pending).await;
    }

    /// Carry out dispatch decisions: force-unmute, immediate republish,
    /// the remote command, and the chatbox announcement.
    async fn execute_pending(&self, pending: Vec<PendingCommand>) {
        if pending.is_empty() {
            return;
        }
        let behavior = self.config.read().await.behavior.clone();
        for cmd in pending {
            if cmd.announce && behavior.force_unmute && self.muted.load(Ordering::Relaxed) {
                self.muted.store(false, Ordering::Relaxed);
                let transport = Arc::clone(&self.transport);
                tokio::spawn(async move {
                    transport.send_game(VOICE_ADDRESS, vec![OscArg::Bool(true)]);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    transport.send_game(VOICE_ADDRESS, vec![OscArg::Bool(false)]);
                });
            }

            self.publish_tick().await;

            let targets = self.live.resolve_shockers(cmd.members.as_deref()).await;
            if targets.is_empty() {
                debug!("no shockers resolved for group {}", cmd.group_name);
            } else {
                let commands: Vec<ControlCommand> = targets
                    .iter()
                    .map(|(_, shocker)| ControlCommand {
                        shocker: *shocker,
                        control_type: cmd.control_type,
                        intensity: cmd.intensity,
                        duration_ms: cmd.duration.as_millis() as u64,
                        exclusive: true,
                    })
                    .collect();
                if let Err(e) = self.control.control(commands).await {
                    warn!("control dispatch for {} failed: {e}", cmd.group_name);
                }
            }

            if cmd.announce {
                self.chatbox
                    .announce_command(&cmd.group_name, cmd.control_type, cmd.intensity, cmd.duration)
                    .await;
            }
        }
    }

    /// One pass of the 300 ms state publish loop.
    async fn publish_tick(&self) {
        let behavior = self.config.read().await.behavior.clone();
        let now = Instant::now();
        let mut any_active = false;
        let mut any_cooldown = false;
        {
            let mut groups = self.groups.write().await;
            for group in groups.values_mut() {
                let cooldown = Duration::from_millis(
                    behavior.for_group(group.config.as_ref()).cooldown_time_ms,
                );
                let active = group.is_active_at(now);
                let on_cooldown = group.is_on_cooldown_at(now, cooldown);
                any_active |= active;
                any_cooldown |= on_cooldown;

                group.active.set(active);
                group.cooldown.set(on_cooldown);
                group
                    .cooldown_percentage
                    .set(group.cooldown_fraction_at(now, cooldown));
                // Intensity drops to zero once neither active nor cooling.
                group.intensity.set(if active || on_cooldown {
                    group.last_intensity as f32 / 100.0
                } else {
                    0.0
                });

                group.active.flush(&self.transport);
                group.cooldown.flush(&self.transport);
                group.cooldown_percentage.flush(&self.transport);
                group.intensity.flush(&self.transport);
            }
        }
        let mut aggregates = self.aggregates.lock().await;
        aggregates.active.set(any_active);
        aggregates.cooldown.set(any_cooldown);
        aggregates.active.flush(&self.transport);
        aggregates.cooldown.flush(&self.transport);
    }

    async fn on_avatar_change(&self, avatar_id: Option<String>) {
        info!(
            "avatar changed to {}",
            avatar_id.as_deref().unwrap_or("unknown")
        );
        *self.avatar_id.write().await = avatar_id;
        {
            let mut groups = self.groups.write().await;
            for group in groups.values_mut() {
                group.reset();
            }
        }
        self.shock_params.write().await.clear();
        self.avatar_params.write().await.clear();
        if let Some(refetch) = self
            .refetch
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            let _ = refetch.send(());
        }
    }

    /// A freshly fetched parameter tree: rebuild both caches, reset group
    /// state, republish everything.
    async fn on_snapshot(&self, snapshot: ParameterSnapshot) {
        {
            let mut groups = self.groups.write().await;
            for group in groups.values_mut() {
                group.reset();
                group.invalidate_params();
            }
        }
        {
            let mut shock = self.shock_params.write().await;
            let mut avatar = self.avatar_params.write().await;
            shock.clear();
            avatar.clear();
            for (path, value) in snapshot.params {
                if let Some(param) = path.strip_prefix(address::PARAM_PREFIX) {
                    if param.starts_with(address::NAMESPACE) {
                        shock.insert(path, value);
                    } else {
                        avatar.insert(path, value);
                    }
                }
            }
            debug!(
                "parameter caches rebuilt: {} owned, {} foreign",
                shock.len(),
                avatar.len()
            );
        }
        if let Some(id) = snapshot.avatar_id {
            *self.avatar_id.write().await = Some(id);
        }
        {
            let mut aggregates = self.aggregates.lock().await;
            aggregates.active.invalidate();
            aggregates.cooldown.invalidate();
        }
        self.remote_config.broadcast_all().await;
        self.publish_tick().await;
    }

    /// The currently loaded avatar, if one was detected.
    pub async fn current_avatar(&self) -> Option<String> {
        self.avatar_id.read().await.clone()
    }

    /// Snapshot of the cached parameters under our namespace.
    pub async fn owned_parameters(&self) -> HashMap<String, serde_json::Value> {
        self.shock_params.read().await.clone()
    }

    /// Snapshot of the cached foreign avatar parameters.
    pub async fn avatar_parameters(&self) -> HashMap<String, serde_json::Value> {
        self.avatar_params.read().await.clone()
    }
}

/// Record the dispatch on the group and produce the pending command.
/// Consumes any one-shot overrides; intensity bookkeeping applies to
/// shocks only.
fn arm_command(
    group: &mut ProgramGroup,
    control_type: ControlType,
    intensity: u8,
    duration: Duration,
    now: Instant,
) -> PendingCommand {
    let intensity = group.next_intensity.take().unwrap_or(intensity);
    let duration = group.next_duration.take().unwrap_or(duration);
    group.last_executed = Some(now);
    group.last_duration = duration;
    if control_type == ControlType::Shock {
        group.last_intensity = intensity;
    }
    group.trigger_method = TriggerMethod::None;
    PendingCommand {
        group_name: group.name.clone(),
        members: group.members().map(<[Uuid]>::to_vec),
        control_type,
        intensity,
        duration,
        announce: true,
    }
}

fn physbone_control_type(action: PhysboneAction) -> Option<ControlType> {
    match action {
        PhysboneAction::None => None,
        PhysboneAction::Shock => Some(ControlType::Shock),
        PhysboneAction::Vibrate => Some(ControlType::Vibrate),
        PhysboneAction::Sound => Some(ControlType::Sound),
    }
}

fn arg_to_json(arg: Option<&OscArg>) -> serde_json::Value {
    match arg {
        Some(OscArg::Bool(v)) => serde_json::Value::Bool(*v),
        Some(OscArg::Float(v)) => serde_json::Number::from_f64(*v as f64)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Some(OscArg::Int(v)) => serde_json::Value::Number((*v).into()),
        Some(OscArg::String(v)) => serde_json::Value::String(v.clone()),
        None => serde_json::Value::Null,
    }
}
