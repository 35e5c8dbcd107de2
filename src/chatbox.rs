//! Templated, rate-paced chatbox feedback
//!
//! Messages are staged into a single pending slot (latest wins) and a
//! pacing loop pushes them to the transport no faster than the configured
//! interval, so rapid triggers cannot flood the in-game text display.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::config::ConfigStore;
use crate::engine::preconditions::CheckResult;
use crate::groups::ControlType;
use crate::osc::transport::OscTransport;

pub struct Chatbox {
    config: Arc<ConfigStore>,
    transport: Arc<OscTransport>,
    pending: Mutex<Option<String>>,
    last_sent: Mutex<Option<Instant>>,
}

impl Chatbox {
    pub fn new(config: Arc<ConfigStore>, transport: Arc<OscTransport>) -> Arc<Self> {
        Arc::new(Self {
            config,
            transport,
            pending: Mutex::new(None),
            last_sent: Mutex::new(None),
        })
    }

    /// Announce a dispatched command.
    pub async fn announce_command(
        &self,
        group_name: &str,
        control_type: ControlType,
        intensity: u8,
        duration: Duration,
    ) {
        let chatbox = self.config.read().await.chatbox.clone();
        if !chatbox.enabled {
            return;
        }
        let text = render(
            &chatbox.template,
            group_name,
            control_type,
            intensity,
            duration,
        );
        self.stage(format!("{}{}", chatbox.prefix, text)).await;
    }

    /// Announce a denied trigger. Outcomes with an empty notice are silent.
    pub async fn announce_denied(&self, outcome: CheckResult) {
        let chatbox = self.config.read().await.chatbox.clone();
        if !chatbox.enabled {
            return;
        }
        let notice = match outcome {
            CheckResult::Success => return,
            CheckResult::KillSwitch => chatbox.killswitch_notice,
            CheckResult::Paused => chatbox.paused_notice,
            CheckResult::Afk => chatbox.afk_notice,
            CheckResult::Cooldown => chatbox.cooldown_notice,
        };
        if notice.is_empty() {
            return;
        }
        self.stage(format!("{}{}", chatbox.prefix, notice)).await;
    }

    async fn stage(&self, text: String) {
        *self.pending.lock().await = Some(text);
    }

    /// Pacing loop: flush the pending slot once the configured interval has
    /// passed since the previous send.
    pub fn spawn_pacing_loop(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(100));
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = interval.tick() => {}
                }
                this.flush_pending().await;
            }
        })
    }

    async fn flush_pending(&self) {
        let timeout = Duration::from_millis(self.config.read().await.chatbox.timeout_ms);
        let mut last_sent = self.last_sent.lock().await;
        if let Some(last) = *last_sent {
            if last.elapsed() < timeout {
                return;
            }
        }
        let Some(text) = self.pending.lock().await.take() else {
            return;
        };
        self.transport.send_chatbox(text);
        *last_sent = Some(Instant::now());
    }
}

fn render(
    template: &str,
    group_name: &str,
    control_type: ControlType,
    intensity: u8,
    duration: Duration,
) -> String {
    template
        .replace("{GroupName}", group_name)
        .replace("{ControlType}", control_type.as_str())
        .replace("{Intensity}", &intensity.to_string())
        .replace("{Duration}", &format!("{:.1}", duration.as_secs_f32()))
}
