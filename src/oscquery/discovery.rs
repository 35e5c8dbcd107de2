//! mDNS discovery of the game client
//!
//! Advertises our own OSC/OSCQuery endpoints and watches for the game
//! client's. A freshly resolved query service is asked for its host-info
//! document (which carries the OSC receive port), then its full parameter
//! tree; the flattened tree plus the detected avatar id is emitted to the
//! subscriber. A goodbye record (TTL=0) forgets the peer so a later
//! identical advertisement is treated as new again.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::Result;

use super::json::{self, HostInfo, OscQueryNode};

const OSCJSON_SERVICE: &str = "_oscjson._tcp.local.";
const OSC_SERVICE: &str = "_osc._udp.local.";

/// Instance-name prefix of the game client's advertisements.
const GAME_SERVICE_PREFIX: &str = "VRChat-Client";

/// Path whose tree value carries the currently loaded avatar id.
const AVATAR_CHANGE_PATH: &str = "/avatar/change";

/// Flattened parameter tree fetched from the game.
#[derive(Debug, Clone)]
pub struct ParameterSnapshot {
    pub params: HashMap<String, serde_json::Value>,
    pub avatar_id: Option<String>,
}

/// Events published to the discovery subscriber.
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// The game's OSC receive endpoint was resolved.
    GameFound { host: IpAddr, osc_port: u16 },
    /// A fresh parameter tree was fetched and flattened.
    Snapshot(ParameterSnapshot),
}

/// Tracks the per-peer state machine: unknown → resolved+queried → gone.
/// Also holds the re-entrant guard dropping overlapping tree fetches.
#[derive(Default)]
struct PeerTracker {
    known: HashMap<String, (IpAddr, u16)>,
    in_flight: HashSet<String>,
}

impl PeerTracker {
    /// Returns true when the peer was not known yet and should be queried.
    fn resolved(&mut self, fullname: &str, host: IpAddr, port: u16) -> bool {
        if self.known.contains_key(fullname) {
            return false;
        }
        self.known.insert(fullname.to_string(), (host, port));
        true
    }

    /// Goodbye record: forget the peer entirely.
    fn removed(&mut self, fullname: &str) -> bool {
        self.in_flight.remove(fullname);
        self.known.remove(fullname).is_some()
    }

    /// Re-entrant guard: a fetch triggered while one is in flight for the
    /// same peer is dropped, not queued.
    fn begin_fetch(&mut self, fullname: &str) -> bool {
        self.in_flight.insert(fullname.to_string())
    }

    fn end_fetch(&mut self, fullname: &str) {
        self.in_flight.remove(fullname);
    }

    fn peers(&self) -> Vec<(String, IpAddr, u16)> {
        self.known
            .iter()
            .map(|(name, (host, port))| (name.clone(), *host, *port))
            .collect()
    }
}

/// Discovery service: mDNS advertise + browse, HTTP tree fetch.
pub struct OscQueryService {
    daemon: ServiceDaemon,
    http: reqwest::Client,
    service_name: String,
    events: mpsc::UnboundedSender<DiscoveryEvent>,
    peers: Mutex<PeerTracker>,
    refetch_tx: mpsc::UnboundedSender<()>,
    refetch_rx: Mutex<Option<mpsc::UnboundedReceiver<()>>>,
}

impl OscQueryService {
    /// Register our two service advertisements and return the service with
    /// its event stream. `osc_port`/`http_port` are the locally bound
    /// ephemeral ports being advertised.
    pub fn start(
        service_name: &str,
        osc_port: u16,
        http_port: u16,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<DiscoveryEvent>)> {
        let daemon = ServiceDaemon::new()?;
        let hostname = format!("{service_name}.local.");

        let no_props = HashMap::<String, String>::new();
        let query = ServiceInfo::new(
            OSCJSON_SERVICE,
            service_name,
            &hostname,
            "",
            http_port,
            no_props.clone(),
        )?
        .enable_addr_auto();
        daemon.register(query)?;

        let data = ServiceInfo::new(OSC_SERVICE, service_name, &hostname, "", osc_port, no_props)?
            .enable_addr_auto();
        daemon.register(data)?;
        info!("advertising {service_name}: oscjson on tcp/{http_port}, osc on udp/{osc_port}");

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (refetch_tx, refetch_rx) = mpsc::unbounded_channel();
        let service = Arc::new(Self {
            daemon,
            http,
            service_name: service_name.to_string(),
            events: events_tx,
            peers: Mutex::new(PeerTracker::default()),
            refetch_tx,
            refetch_rx: Mutex::new(Some(refetch_rx)),
        });
        Ok((service, events_rx))
    }

    /// Handle for requesting a parameter re-fetch (used on avatar change).
    pub fn refetch_handle(&self) -> mpsc::UnboundedSender<()> {
        self.refetch_tx.clone()
    }

    /// Spawn the browse and refetch loops.
    pub fn spawn_loops(
        self: &Arc<Self>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Vec<JoinHandle<()>>> {
        let mut handles = Vec::new();

        let query_events = self.daemon.browse(OSCJSON_SERVICE)?;
        let this = Arc::clone(self);
        let mut stop = shutdown.clone();
        handles.push(tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = stop.changed() => break,
                    ev = query_events.recv_async() => match ev {
                        Ok(ev) => ev,
                        Err(_) => break,
                    },
                };
                this.handle_query_event(event);
            }
        }));

        // The UDP data service is advertised by the game too, but only its
        // HTTP counterpart is ever queried.
        let data_events = self.daemon.browse(OSC_SERVICE)?;
        let mut stop = shutdown.clone();
        handles.push(tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = stop.changed() => break,
                    ev = data_events.recv_async() => match ev {
                        Ok(ev) => ev,
                        Err(_) => break,
                    },
                };
                if let ServiceEvent::ServiceResolved(info) = event {
                    debug!("ignoring UDP service record {}", info.get_fullname());
                }
            }
        }));

        let refetch_rx = self
            .refetch_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| crate::error::Error::Other("spawn_loops called twice".into()))?;
        let this = Arc::clone(self);
        let mut stop = shutdown;
        handles.push(tokio::spawn(async move {
            let mut refetch_rx = refetch_rx;
            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    req = refetch_rx.recv() => {
                        if req.is_none() {
                            break;
                        }
                        let peers = this.peers.lock().unwrap_or_else(|e| e.into_inner()).peers();
                        for (fullname, host, port) in peers {
                            this.spawn_tree_fetch(fullname, host, port);
                        }
                    }
                }
            }
        }));

        Ok(handles)
    }

    pub fn stop(&self) {
        let _ = self.daemon.shutdown();
    }

    fn handle_query_event(self: &Arc<Self>, event: ServiceEvent) {
        match event {
            ServiceEvent::ServiceResolved(info) => {
                let fullname = info.get_fullname().to_string();
                if fullname.starts_with(&self.service_name) {
                    return; // our own advertisement
                }
                if !fullname.starts_with(GAME_SERVICE_PREFIX) {
                    debug!("ignoring unrelated oscjson service {fullname}");
                    return;
                }
                let Some(host) = info.get_addresses().iter().next().copied() else {
                    warn!("resolved {fullname} without an address");
                    return;
                };
                let port = info.get_port();
                let newly_known = self
                    .peers
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .resolved(&fullname, host, port);
                if newly_known {
                    info!("discovered game query service {fullname} at {host}:{port}");
                    let this = Arc::clone(self);
                    tokio::spawn(async move {
                        this.query_peer(fullname, host, port).await;
                    });
                }
            }
            ServiceEvent::ServiceRemoved(_ty, fullname) => {
                let forgotten = self
                    .peers
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .removed(&fullname);
                if forgotten {
                    info!("game query service {fullname} said goodbye");
                }
            }
            _ => {}
        }
    }

    /// Full first-contact query: host info (OSC endpoint), then the tree.
    async fn query_peer(self: Arc<Self>, fullname: String, host: IpAddr, port: u16) {
        match self.fetch_host_info(host, port).await {
            Ok(host_info) => {
                // Prefer the address the peer claims for itself; fall back
                // to the resolved mDNS address.
                let osc_host = host_info.osc_ip.parse::<IpAddr>().unwrap_or(host);
                let _ = self.events.send(DiscoveryEvent::GameFound {
                    host: osc_host,
                    osc_port: host_info.osc_port,
                });
            }
            Err(e) => {
                warn!("host-info query for {fullname} failed: {e}");
                self.peers
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .removed(&fullname);
                return;
            }
        }
        self.fetch_tree(fullname, host, port).await;
    }

    fn spawn_tree_fetch(self: &Arc<Self>, fullname: String, host: IpAddr, port: u16) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.fetch_tree(fullname, host, port).await;
        });
    }

    async fn fetch_host_info(&self, host: IpAddr, port: u16) -> Result<HostInfo> {
        let url = format!("http://{host}:{port}/?HOST_INFO");
        Ok(self.http.get(url).send().await?.json::<HostInfo>().await?)
    }

    async fn fetch_tree(&self, fullname: String, host: IpAddr, port: u16) {
        {
            let mut peers = self.peers.lock().unwrap_or_else(|e| e.into_inner());
            if !peers.begin_fetch(&fullname) {
                debug!("parameter fetch for {fullname} already in flight, dropping");
                return;
            }
        }
        let result = self.fetch_tree_inner(host, port).await;
        self.peers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .end_fetch(&fullname);
        match result {
            Ok(snapshot) => {
                info!(
                    "fetched {} parameters from {fullname} (avatar: {})",
                    snapshot.params.len(),
                    snapshot.avatar_id.as_deref().unwrap_or("unknown")
                );
                let _ = self.events.send(DiscoveryEvent::Snapshot(snapshot));
            }
            Err(e) => warn!("parameter fetch from {fullname} failed: {e}"),
        }
    }

    async fn fetch_tree_inner(&self, host: IpAddr, port: u16) -> Result<ParameterSnapshot> {
        let url = format!("http://{host}:{port}/");
        let root = self
            .http
            .get(url)
            .send()
            .await?
            .json::<OscQueryNode>()
            .await?;
        let params = json::flatten(&root);
        let avatar_id = params
            .get(AVATAR_CHANGE_PATH)
            .and_then(|v| v.as_str())
            .map(str::to_string);
        Ok(ParameterSnapshot { params, avatar_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn goodbye_makes_a_peer_new_again() {
        let mut tracker = PeerTracker::default();
        let host: IpAddr = "127.0.0.1".parse().unwrap();

        assert!(tracker.resolved("VRChat-Client-x._oscjson._tcp.local.", host, 9001));
        // Re-advertisement of a known peer is not queried again.
        assert!(!tracker.resolved("VRChat-Client-x._oscjson._tcp.local.", host, 9001));

        // TTL=0 goodbye forgets it...
        assert!(tracker.removed("VRChat-Client-x._oscjson._tcp.local."));
        // ...so an identical advertisement is treated as new.
        assert!(tracker.resolved("VRChat-Client-x._oscjson._tcp.local.", host, 9001));
    }

    #[test]
    fn overlapping_fetches_are_dropped() {
        let mut tracker = PeerTracker::default();
        assert!(tracker.begin_fetch("VRChat-Client-x"));
        assert!(!tracker.begin_fetch("VRChat-Client-x"), "second fetch must be dropped");
        tracker.end_fetch("VRChat-Client-x");
        assert!(tracker.begin_fetch("VRChat-Client-x"));
    }

    #[test]
    fn removal_clears_the_fetch_guard() {
        let mut tracker = PeerTracker::default();
        let host: IpAddr = "127.0.0.1".parse().unwrap();
        tracker.resolved("VRChat-Client-x", host, 9001);
        tracker.begin_fetch("VRChat-Client-x");
        tracker.removed("VRChat-Client-x");
        assert!(tracker.begin_fetch("VRChat-Client-x"));
    }
}
