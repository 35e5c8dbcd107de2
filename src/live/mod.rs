//! Live control: persistent per-device control streams
//!
//! Keeps exactly one open control stream per reachable remote device,
//! opening a stream on first sight and disposing it when the device leaves
//! the known set or self-reports disconnection. Continuous ("concurrent")
//! intensity frames are fanned out here, one frame per enabled shocker per
//! tick; shockers on devices without a live client are silently skipped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::sync::{watch, Mutex, RwLock};
use uuid::Uuid;

use crate::error::Result;
use crate::groups::ControlType;

/// One remote command.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlCommand {
    pub shocker: Uuid,
    pub control_type: ControlType,
    /// 0..=100
    pub intensity: u8,
    pub duration_ms: u64,
    /// Replace any command still running on the shocker.
    pub exclusive: bool,
}

/// Remote control API boundary. The embedding application supplies the real
/// client; the crate ships [`LoggingControlApi`] for headless/dry-run use.
#[async_trait]
pub trait ControlApi: Send + Sync {
    /// Fire-and-forget one-shot commands.
    async fn control(&self, commands: Vec<ControlCommand>) -> Result<()>;

    /// Open a persistent control stream to a device.
    async fn open_live_stream(&self, device: Uuid) -> Result<Box<dyn LiveStream>>;
}

/// A persistent per-device control stream.
#[async_trait]
pub trait LiveStream: Send + Sync {
    /// Push one intensity frame for a shocker.
    async fn intake_frame(&self, shocker: Uuid, control_type: ControlType, intensity: u8)
        -> Result<()>;

    /// Self-reported connection state; `false` triggers disposal.
    fn is_connected(&self) -> bool;

    async fn dispose(&self);
}

/// A remote device and its shockers, as last reported by the device list.
#[derive(Debug, Clone)]
pub struct DeviceSnapshot {
    pub id: Uuid,
    pub online: bool,
    pub shockers: Vec<ShockerSnapshot>,
}

#[derive(Debug, Clone)]
pub struct ShockerSnapshot {
    pub id: Uuid,
    pub enabled: bool,
}

/// Maintains the per-device live clients and streams frames to them.
pub struct LiveControlManager {
    api: Arc<dyn ControlApi>,
    devices: RwLock<Vec<DeviceSnapshot>>,
    clients: RwLock<HashMap<Uuid, Arc<Box<dyn LiveStream>>>>,
    /// Serializes reconciliation so concurrent triggers collapse into
    /// sequential passes.
    refresh_lock: Mutex<()>,
    shutdown: watch::Receiver<bool>,
}

impl LiveControlManager {
    pub fn new(api: Arc<dyn ControlApi>, shutdown: watch::Receiver<bool>) -> Arc<Self> {
        Arc::new(Self {
            api,
            devices: RwLock::new(Vec::new()),
            clients: RwLock::new(HashMap::new()),
            refresh_lock: Mutex::new(()),
            shutdown,
        })
    }

    pub fn api(&self) -> Arc<dyn ControlApi> {
        Arc::clone(&self.api)
    }

    /// Replace the known device set and reconcile clients against it.
    pub async fn set_devices(self: &Arc<Self>, devices: Vec<DeviceSnapshot>) {
        *self.devices.write().await = devices;
        self.refresh().await;
    }

    /// Reconcile the client map against the latest device list: open a
    /// stream for every online device without one, dispose streams whose
    /// device disappeared or went offline.
    pub async fn refresh(self: &Arc<Self>) {
        let _guard = self.refresh_lock.lock().await;

        let devices = self.devices.read().await.clone();
        let online: Vec<Uuid> = devices
            .iter()
            .filter(|d| d.online)
            .map(|d| d.id)
            .collect();

        let stale: Vec<Uuid> = {
            let clients = self.clients.read().await;
            clients
                .keys()
                .filter(|id| !online.contains(id))
                .copied()
                .collect()
        };
        for id in stale {
            self.drop_client(id).await;
        }

        for id in online {
            if self.clients.read().await.contains_key(&id) {
                continue;
            }
            match self.api.open_live_stream(id).await {
                Ok(stream) => {
                    info!("live control stream opened for device {id}");
                    self.clients.write().await.insert(id, Arc::new(stream));
                    self.spawn_watchdog(id);
                }
                Err(e) => warn!("failed to open live stream for device {id}: {e}"),
            }
        }
    }

    async fn drop_client(&self, device: Uuid) {
        if let Some(client) = self.clients.write().await.remove(&device) {
            info!("disposing live control stream for device {device}");
            client.dispose().await;
        }
    }

    /// Watch a stream's self-reported state; disposal on disconnect is
    /// isolated to that one device.
    fn spawn_watchdog(self: &Arc<Self>, device: Uuid) {
        let this = Arc::clone(self);
        let mut shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = interval.tick() => {}
                }
                let connected = match this.clients.read().await.get(&device) {
                    Some(client) => client.is_connected(),
                    // Removed by refresh; watchdog is done.
                    None => break,
                };
                if !connected {
                    info!("device {device} reported disconnection");
                    this.drop_client(device).await;
                    break;
                }
            }
        });
    }

    /// Resolve the enabled shockers addressed by `members` (`None` means
    /// every shocker) to their owning devices.
    pub async fn resolve_shockers(&self, members: Option<&[Uuid]>) -> Vec<(Uuid, Uuid)> {
        let devices = self.devices.read().await;
        let mut out = Vec::new();
        for device in devices.iter() {
            for shocker in &device.shockers {
                if !shocker.enabled {
                    continue;
                }
                if members.map_or(true, |m| m.contains(&shocker.id)) {
                    out.push((device.id, shocker.id));
                }
            }
        }
        out
    }

    /// Push one frame per addressed shocker to its device's live client.
    pub async fn send_frame(
        &self,
        members: Option<&[Uuid]>,
        control_type: ControlType,
        intensity: u8,
    ) {
        let targets = self.resolve_shockers(members).await;
        let clients = self.clients.read().await;
        for (device, shocker) in targets {
            let Some(client) = clients.get(&device) else {
                debug!("no live client for device {device}, skipping shocker {shocker}");
                continue;
            };
            if let Err(e) = client.intake_frame(shocker, control_type, intensity).await {
                warn!("frame for shocker {shocker} failed: {e}");
            }
        }
    }
}

/// Dry-run backend: logs every command and frame instead of reaching a
/// remote API. Used by the headless binary and in tests.
pub struct LoggingControlApi;

#[async_trait]
impl ControlApi for LoggingControlApi {
    async fn control(&self, commands: Vec<ControlCommand>) -> Result<()> {
        for cmd in commands {
            info!(
                "control: {} {} at {}% for {}ms (exclusive: {})",
                cmd.control_type.as_str(),
                cmd.shocker,
                cmd.intensity,
                cmd.duration_ms,
                cmd.exclusive
            );
        }
        Ok(())
    }

    async fn open_live_stream(&self, device: Uuid) -> Result<Box<dyn LiveStream>> {
        info!("opening dry-run live stream for device {device}");
        Ok(Box::new(LoggingLiveStream {
            device,
            connected: std::sync::atomic::AtomicBool::new(true),
        }))
    }
}

struct LoggingLiveStream {
    device: Uuid,
    connected: std::sync::atomic::AtomicBool,
}

#[async_trait]
impl LiveStream for LoggingLiveStream {
    async fn intake_frame(
        &self,
        shocker: Uuid,
        control_type: ControlType,
        intensity: u8,
    ) -> Result<()> {
        debug!(
            "frame: {} {} at {}% (device {})",
            control_type.as_str(),
            shocker,
            intensity,
            self.device
        );
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(std::sync::atomic::Ordering::Relaxed)
    }

    async fn dispose(&self) {
        self.connected
            .store(false, std::sync::atomic::Ordering::Relaxed);
        debug!("dry-run live stream for device {} disposed", self.device);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording control backend shared by the engine tests.

    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    pub struct Recorder {
        pub commands: StdMutex<Vec<ControlCommand>>,
        pub frames: StdMutex<Vec<(Uuid, ControlType, u8)>>,
    }

    pub struct RecordingApi {
        pub recorder: Arc<Recorder>,
        pub fail_streams: bool,
    }

    impl RecordingApi {
        pub fn new() -> (Arc<Self>, Arc<Recorder>) {
            let recorder = Arc::new(Recorder::default());
            (
                Arc::new(Self {
                    recorder: Arc::clone(&recorder),
                    fail_streams: false,
                }),
                recorder,
            )
        }
    }

    #[async_trait]
    impl ControlApi for RecordingApi {
        async fn control(&self, commands: Vec<ControlCommand>) -> Result<()> {
            self.recorder
                .commands
                .lock()
                .unwrap()
                .extend(commands);
            Ok(())
        }

        async fn open_live_stream(&self, _device: Uuid) -> Result<Box<dyn LiveStream>> {
            if self.fail_streams {
                return Err(crate::error::Error::Other("stream refused".into()));
            }
            Ok(Box::new(RecordingStream {
                recorder: Arc::clone(&self.recorder),
                connected: AtomicBool::new(true),
            }))
        }
    }

    pub struct RecordingStream {
        recorder: Arc<Recorder>,
        connected: AtomicBool,
    }

    #[async_trait]
    impl LiveStream for RecordingStream {
        async fn intake_frame(
            &self,
            shocker: Uuid,
            control_type: ControlType,
            intensity: u8,
        ) -> Result<()> {
            self.recorder
                .frames
                .lock()
                .unwrap()
                .push((shocker, control_type, intensity));
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::Relaxed)
        }

        async fn dispose(&self) {
            self.connected.store(false, Ordering::Relaxed);
        }
    }

    pub fn device_with_shockers(shockers: &[Uuid]) -> DeviceSnapshot {
        DeviceSnapshot {
            id: Uuid::new_v4(),
            online: true,
            shockers: shockers
                .iter()
                .map(|id| ShockerSnapshot {
                    id: *id,
                    enabled: true,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    fn shutdown_rx() -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        std::mem::forget(tx);
        rx
    }

    #[tokio::test]
    async fn one_client_per_online_device() {
        let (api, _recorder) = RecordingApi::new();
        let manager = LiveControlManager::new(api, shutdown_rx());

        let shocker = Uuid::new_v4();
        let device = device_with_shockers(&[shocker]);
        let device_id = device.id;

        manager.set_devices(vec![device.clone()]).await;
        assert_eq!(manager.clients.read().await.len(), 1);

        // A second reconcile with the same list opens nothing new.
        manager.refresh().await;
        assert_eq!(manager.clients.read().await.len(), 1);
        assert!(manager.clients.read().await.contains_key(&device_id));
    }

    #[tokio::test]
    async fn offline_devices_are_disposed() {
        let (api, _recorder) = RecordingApi::new();
        let manager = LiveControlManager::new(api, shutdown_rx());

        let mut device = device_with_shockers(&[Uuid::new_v4()]);
        manager.set_devices(vec![device.clone()]).await;
        assert_eq!(manager.clients.read().await.len(), 1);

        device.online = false;
        manager.set_devices(vec![device]).await;
        assert!(manager.clients.read().await.is_empty());
    }

    #[tokio::test]
    async fn frames_reach_only_clients_of_known_devices() {
        let (api, recorder) = RecordingApi::new();
        let manager = LiveControlManager::new(api, shutdown_rx());

        let reachable = Uuid::new_v4();
        let unreachable = Uuid::new_v4();
        let mut offline = device_with_shockers(&[unreachable]);
        offline.online = false;
        manager
            .set_devices(vec![device_with_shockers(&[reachable]), offline])
            .await;

        manager
            .send_frame(None, ControlType::Vibrate, 40)
            .await;

        let frames = recorder.frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], (reachable, ControlType::Vibrate, 40));
    }

    #[tokio::test]
    async fn member_filter_limits_the_fanout() {
        let (api, recorder) = RecordingApi::new();
        let manager = LiveControlManager::new(api, shutdown_rx());

        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        manager
            .set_devices(vec![device_with_shockers(&[a, b])])
            .await;

        manager
            .send_frame(Some(&[b]), ControlType::Shock, 25)
            .await;

        let frames = recorder.frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0, b);
    }

    #[tokio::test]
    async fn disabled_shockers_are_skipped() {
        let (api, recorder) = RecordingApi::new();
        let manager = LiveControlManager::new(api, shutdown_rx());

        let enabled = Uuid::new_v4();
        let disabled = Uuid::new_v4();
        let mut device = device_with_shockers(&[enabled, disabled]);
        device.shockers[1].enabled = false;
        manager.set_devices(vec![device]).await;

        manager.send_frame(None, ControlType::Sound, 10).await;

        let frames = recorder.frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0, enabled);
    }
}
