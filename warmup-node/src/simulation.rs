//! Whole-cluster warmup in one process.
//!
//! One emitter (node 0) and `repeaters` repeaters (nodes 1..=N) each run
//! their own rendering thread over a [`LoopbackHub`] and a shared
//! [`SimulatedBarrier`]. Every node renders until its barrier is warmed up
//! plus a few frames, or until its warmup failed.

use framelock_types::{FrameData, InitializationState, Message, NodeId};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::cluster::{ClusterSyncState, LocalClusterState, NodeRole};
use crate::config::{ConfigError, WarmupConfig};
use crate::context::NodeContext;
use crate::driver::{BarrierSettings, SimulatedBarrier, SimulatedDriver};
use crate::error::NodeError;
use crate::init_state::{HardwareSyncInitState, WarmupCoordinator};
use crate::signal::ManualResetEvent;
use crate::transport::{LoopbackEndpoint, LoopbackHub, MessageTransport};

/// Extra time granted to a simulation past the handshake timeout.
const SIMULATION_GRACE: Duration = Duration::from_secs(30);

/// Settings of a simulated cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationSettings {
    /// Number of repeaters (default: 2).
    #[serde(default = "default_repeaters")]
    pub repeaters: u8,
    /// Presents a node may run ahead of the slowest one (default: 0).
    #[serde(default)]
    pub slack: u64,
    /// Time before the barrier starts blocking in milliseconds (default: 0).
    #[serde(default)]
    pub activation_delay_ms: u64,
    /// Duration of a present not held by the barrier (default: 5).
    #[serde(default = "default_frame_time_ms")]
    pub frame_time_ms: u64,
    /// Drop every n-th message on the network, 0 to drop nothing
    /// (default: 0).
    #[serde(default)]
    pub drop_every: u64,
    /// Frames rendered after the warmup before a node stops (default: 3).
    #[serde(default = "default_frames_after_warmup")]
    pub frames_after_warmup: u32,
    /// The last repeater is a backup promoted to emitter once warmed up
    /// (default: false).
    #[serde(default)]
    pub promote_backup: bool,
    /// Terminate the cluster after this many milliseconds (default: never).
    #[serde(default)]
    pub terminate_after_ms: Option<u64>,
    /// Warmup configuration shared by every node.
    #[serde(default)]
    pub warmup: WarmupConfig,
}

fn default_repeaters() -> u8 {
    2
}

fn default_frame_time_ms() -> u64 {
    5
}

fn default_frames_after_warmup() -> u32 {
    3
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            repeaters: default_repeaters(),
            slack: 0,
            activation_delay_ms: 0,
            frame_time_ms: default_frame_time_ms(),
            drop_every: 0,
            frames_after_warmup: default_frames_after_warmup(),
            promote_backup: false,
            terminate_after_ms: None,
            warmup: WarmupConfig::default(),
        }
    }
}

impl SimulationSettings {
    /// Load settings from a TOML file. The warmup configuration goes in a
    /// `[warmup]` table.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let settings: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        settings.warmup.validate()?;
        Ok(settings)
    }

    fn barrier_settings(&self) -> BarrierSettings {
        BarrierSettings {
            slack: self.slack,
            activation_delay: Duration::from_millis(self.activation_delay_ms),
            frame_time: Duration::from_millis(self.frame_time_ms),
        }
    }
}

/// Outcome of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeReport {
    /// Node id.
    pub node_id: u8,
    /// Role the node started with.
    pub role: NodeRole,
    /// Final initialization state.
    pub initialization_state: InitializationState,
    /// Whether the node's barrier warmed up.
    pub warmed_up: bool,
    /// Frames rendered.
    pub frames: u64,
    /// Presents performed, repeated presents included.
    pub presents: u64,
    /// Measured present pipeline depth (emitter only).
    pub present_pipeline_depth: Option<u32>,
    /// Additional presents performed in the final burst (repeaters only).
    pub additional_presents: Option<u32>,
    /// Whether the emitter acknowledged the final burst (repeaters only).
    pub acknowledged: Option<bool>,
    /// Presents that bypassed the barrier.
    pub unsynchronized_presents: u64,
    /// Error that stopped the node, if any.
    pub error: Option<String>,
}

impl NodeReport {
    fn new(node_id: NodeId, role: NodeRole) -> Self {
        Self {
            node_id: node_id.value(),
            role,
            initialization_state: InitializationState::NotInitialized,
            warmed_up: false,
            frames: 0,
            presents: 0,
            present_pipeline_depth: None,
            additional_presents: None,
            acknowledged: None,
            unsynchronized_presents: 0,
            error: None,
        }
    }

    /// Whether the node warmed up without error.
    pub fn succeeded(&self) -> bool {
        self.warmed_up && self.error.is_none()
    }
}

/// Outcome of a simulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationReport {
    /// One report per node, emitter first.
    pub nodes: Vec<NodeReport>,
    /// Messages sent on the network.
    pub messages_sent: u64,
    /// Messages dropped by the network.
    pub messages_dropped: u64,
    /// Wall-clock duration in milliseconds.
    pub elapsed_ms: u64,
}

impl SimulationReport {
    /// Whether every node warmed up.
    pub fn succeeded(&self) -> bool {
        self.nodes.iter().all(NodeReport::succeeded)
    }

    /// Report of the emitter.
    pub fn emitter(&self) -> Option<&NodeReport> {
        self.nodes.iter().find(|node| node.role == NodeRole::Emitter)
    }

    /// Reports of the repeaters and backups.
    pub fn repeaters(&self) -> impl Iterator<Item = &NodeReport> {
        self.nodes.iter().filter(|node| node.role != NodeRole::Emitter)
    }
}

struct SimulatedNode {
    config: WarmupConfig,
    role: NodeRole,
    endpoint: LoopbackEndpoint,
    driver: Arc<SimulatedDriver>,
    cluster: Arc<LocalClusterState>,
}

/// Run a whole cluster until every node is done.
pub fn run_simulation(settings: &SimulationSettings) -> Result<SimulationReport, NodeError> {
    settings.warmup.validate()?;
    let started = Instant::now();
    let stop_at = started + settings.warmup.handshake_timeout() + SIMULATION_GRACE;

    let hub = LoopbackHub::with_drop_every(settings.drop_every);
    let barrier = Arc::new(SimulatedBarrier::new(settings.barrier_settings()));
    let emitter_cluster = Arc::new(LocalClusterState::new(NodeRole::Emitter));
    emitter_cluster.set_repeaters_delayed_one_frame(settings.warmup.repeaters_delayed);

    let mut nodes = Vec::with_capacity(usize::from(settings.repeaters) + 1);
    for index in 0..=settings.repeaters {
        let node_id = NodeId::new(index);
        let role = match index {
            0 => NodeRole::Emitter,
            last if settings.promote_backup && last == settings.repeaters => NodeRole::Backup,
            _ => NodeRole::Repeater,
        };
        let cluster = if role == NodeRole::Emitter {
            Arc::clone(&emitter_cluster)
        } else {
            emitter_cluster.add_repeater(node_id);
            Arc::new(emitter_cluster.sibling(role))
        };
        nodes.push(SimulatedNode {
            config: settings.warmup.for_node(node_id),
            role,
            endpoint: hub.endpoint(node_id),
            driver: Arc::new(SimulatedDriver::new(node_id, Arc::clone(&barrier))),
            cluster,
        });
    }

    tracing::info!(
        "Simulating 1 emitter and {} repeaters (slack {}, drop every {})",
        settings.repeaters,
        settings.slack,
        settings.drop_every
    );

    let finished = Arc::new(ManualResetEvent::new());
    let terminator = match settings.terminate_after_ms {
        Some(after_ms) => {
            let cluster = Arc::clone(&emitter_cluster);
            let finished = Arc::clone(&finished);
            Some(
                thread::Builder::new()
                    .name("framelock-terminator".to_string())
                    .spawn(move || {
                        if !finished.wait_timeout(Duration::from_millis(after_ms)) {
                            cluster.terminate();
                        }
                    })?,
            )
        }
        None => None,
    };

    let mut handles = Vec::with_capacity(nodes.len());
    for node in nodes {
        let node_id = node.config.node_id();
        let role = node.role;
        let node_settings = settings.clone();
        let spawned = thread::Builder::new()
            .name(format!("framelock-node-{}", node_id))
            .spawn(move || run_node(node, &node_settings, stop_at));
        match spawned {
            Ok(handle) => handles.push((node_id, role, handle)),
            Err(e) => {
                // Let the nodes already running give up.
                emitter_cluster.terminate();
                barrier.shutdown();
                for (_, _, handle) in handles {
                    let _ = handle.join();
                }
                return Err(e.into());
            }
        }
    }

    let mut reports = Vec::with_capacity(handles.len());
    for (node_id, role, handle) in handles {
        let report = handle.join().unwrap_or_else(|_| {
            let mut report = NodeReport::new(node_id, role);
            report.error = Some("node thread panicked".to_string());
            report
        });
        reports.push(report);
    }

    finished.set();
    if let Some(terminator) = terminator {
        let _ = terminator.join();
    }

    let report = SimulationReport {
        nodes: reports,
        messages_sent: hub.sent_messages(),
        messages_dropped: hub.dropped_messages(),
        elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
    };
    if report.succeeded() {
        tracing::info!("Cluster warmed up in {} ms", report.elapsed_ms);
    } else {
        tracing::warn!("Cluster failed to warm up");
    }
    Ok(report)
}

/// Rendering thread of one node.
fn run_node(node: SimulatedNode, settings: &SimulationSettings, stop_at: Instant) -> NodeReport {
    let SimulatedNode {
        config,
        role,
        endpoint,
        driver,
        cluster,
    } = node;
    let node_id = config.node_id();
    let mut report = NodeReport::new(node_id, role);

    let context = NodeContext::new(
        Arc::new(endpoint.clone()),
        driver.clone(),
        cluster.clone(),
    );
    let mut sync = HardwareSyncInitState::new(context, config);
    let mut frames_after_warmup = 0;

    loop {
        if Instant::now() >= stop_at {
            report.error = Some("simulation ran out of time".to_string());
            break;
        }
        if let Err(e) = sync.do_frame() {
            report.error = Some(e.to_string());
            break;
        }
        if sync.check().is_err() {
            break;
        }

        // Repeaters learn the emitter moved on from its frame data.
        if role == NodeRole::Emitter {
            let frame = Message::FrameData(FrameData::empty(report.frames));
            if let Err(e) = endpoint.send(&frame) {
                tracing::warn!("Failed to send frame data: {}", e);
            }
        }

        let frame = driver.present_frame();
        report.frames += 1;
        report.presents += u64::from(frame.presents);

        if sync.is_barrier_warmed_up() {
            frames_after_warmup += 1;
            if frames_after_warmup >= settings.frames_after_warmup {
                break;
            }
        }
        let warming_up = sync
            .coordinator()
            .is_some_and(|coordinator| !coordinator.is_finished());
        if cluster.is_terminated() && !warming_up {
            break;
        }
    }

    report.initialization_state = sync.initialization_state();
    report.warmed_up = sync.is_barrier_warmed_up();
    match sync.coordinator() {
        Some(WarmupCoordinator::Emitter(emitter)) => {
            report.present_pipeline_depth = Some(emitter.present_pipeline_depth());
        }
        Some(WarmupCoordinator::Repeater(repeater)) => {
            report.additional_presents = Some(repeater.performed_additional_presents());
            report.acknowledged = Some(repeater.is_acknowledged());
        }
        None => {}
    }

    if role == NodeRole::Backup && settings.promote_backup && report.warmed_up {
        cluster.set_role(NodeRole::Emitter);
        let frame = driver.present_frame();
        report.frames += 1;
        report.presents += u64::from(frame.presents);
    }
    report.unsynchronized_presents = driver.unsynchronized_presents();

    sync.dispose();
    endpoint.close();
    tracing::debug!("Node {} stopped after {} frames", node_id, report.frames);
    report
}
