//! Scaling session — preflight once, then cycle until shut down.
//!
//! ```text
//! start() ── validate ──✗──→ SessionError::Config
//!    │
//!    └── preflight: Checking → [Enabling → wait active] → Ready
//!                      ✗ → SessionError::Preflight
//!    │
//!    └── spawn loop:
//!          Collecting → Deciding → [Changing] → Cooldown(next delay) → …
//!          shutdown while sleeping or waiting → Stopped
//! ```
//!
//! The tracking table lives inside the session and is only touched by the
//! loop task.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use streamscale_client::{
    wait_for_active, ClientError, ClientResult, MetricsSource, Notifier, StreamManager,
};
use streamscale_core::{PartitionId, ScalingConfig};
use streamscale_metrics::{PartitionMetricsCollector, ScalingWindows};

use crate::error::SessionError;
use crate::executor::{ChangeOutcome, TopologyChangeExecutor};
use crate::hooks::LifecycleHooks;
use crate::scaler::{Evaluation, ScaleDecision, ScalingPolicy};
use crate::topology;
use crate::tracking::ShardTrackingTable;

/// What the session is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Verifying (or enabling) per-partition metrics.
    Preflight,
    /// Taking the topology snapshot and fetching metrics.
    Collecting,
    /// Running the scaling policy.
    Deciding,
    /// A split or merge is in flight.
    Changing,
    /// Sleeping until the next cycle.
    Cooldown,
    Stopped,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionPhase::Preflight => "preflight",
            SessionPhase::Collecting => "collecting",
            SessionPhase::Deciding => "deciding",
            SessionPhase::Changing => "changing",
            SessionPhase::Cooldown => "cooldown",
            SessionPhase::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// The three clients a session talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub stream: Arc<dyn StreamManager>,
    pub metrics: Arc<dyn MetricsSource>,
    pub notifier: Arc<dyn Notifier>,
}

impl Collaborators {
    /// Use one value for all three roles.
    pub fn single<T>(client: Arc<T>) -> Self
    where
        T: StreamManager + MetricsSource + Notifier + 'static,
    {
        Self {
            stream: client.clone(),
            metrics: client.clone(),
            notifier: client,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The topology snapshot failed; nothing was evaluated.
    Aborted(ClientError),
    NoChange,
    Changed(ChangeOutcome),
}

/// Summary of one cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// Open partitions in the snapshot.
    pub partitions: usize,
    /// Partitions first observed in this cycle.
    pub newly_tracked: Vec<PartitionId>,
    pub evaluation: Option<Evaluation>,
    pub outcome: CycleOutcome,
    pub next_delay: Duration,
}

impl CycleReport {
    pub fn decision(&self) -> Option<&ScaleDecision> {
        self.evaluation.as_ref().map(|e| &e.decision)
    }
}

#[derive(Debug)]
enum PreflightState {
    Checking,
    Enabling,
    Ready,
    Failed(ClientError),
}

pub struct ScalingSession {
    config: ScalingConfig,
    policy: ScalingPolicy,
    stream: Arc<dyn StreamManager>,
    collector: PartitionMetricsCollector,
    executor: TopologyChangeExecutor,
    tracking: ShardTrackingTable,
    phase_tx: watch::Sender<SessionPhase>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ScalingSession {
    pub fn new(config: ScalingConfig, hooks: LifecycleHooks, collaborators: Collaborators) -> Self {
        let collector = PartitionMetricsCollector::new(
            collaborators.metrics,
            &config.stream_name,
            config.metrics_lookback_minutes(),
        );
        let executor = TopologyChangeExecutor::new(
            &config,
            collaborators.stream.clone(),
            collaborators.notifier,
            hooks,
        );
        let (phase_tx, _) = watch::channel(SessionPhase::Preflight);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            policy: ScalingPolicy::from_config(&config),
            stream: collaborators.stream,
            collector,
            executor,
            tracking: ShardTrackingTable::new(),
            phase_tx,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
            config,
        }
    }

    /// Validate, run preflight, and spawn the scaling loop.
    ///
    /// Fails without spawning anything if the config is invalid or metrics
    /// cannot be enabled.
    pub async fn start(mut self) -> Result<SessionHandle, SessionError> {
        let violations = self.config.violations();
        if !violations.is_empty() {
            error!(violations = ?violations, "invalid scaling configuration");
            return Err(SessionError::Config(violations));
        }

        let shown = self.config.redacted();
        info!(
            stream = %shown.stream_name,
            region = %shown.region,
            shard_limit = shown.shard_limit,
            max_shard = shown.max_shard,
            spare_shard = shown.spare_shard,
            split_duration = shown.scaling_split_duration,
            merge_duration = shown.scaling_merge_duration,
            "starting scaling session"
        );
        debug!(config = ?shown, "effective configuration");

        self.preflight().await.map_err(SessionError::Preflight)?;

        let handle_phase = self.phase_tx.subscribe();
        let shutdown = self.shutdown_tx.clone();
        let stream_name = self.config.stream_name.clone();
        let task = tokio::spawn(self.run());

        Ok(SessionHandle {
            stream_name,
            phase: handle_phase,
            shutdown,
            task,
        })
    }

    /// Make sure per-partition `IncomingRecords` metrics are enabled.
    pub async fn preflight(&mut self) -> ClientResult<()> {
        self.set_phase(SessionPhase::Preflight);
        let stream_name = self.config.stream_name.clone();
        let mut state = PreflightState::Checking;

        loop {
            debug!(stream = %stream_name, state = ?state, "preflight");
            state = match state {
                PreflightState::Checking => match self.stream.describe_stream(&stream_name).await {
                    Ok(desc) if desc.enhanced_metrics_enabled() => PreflightState::Ready,
                    Ok(_) => {
                        info!(stream = %stream_name, "shard level metrics disabled, enabling");
                        PreflightState::Enabling
                    }
                    Err(e) => PreflightState::Failed(e),
                },
                PreflightState::Enabling => {
                    match self.stream.enable_enhanced_metrics(&stream_name).await {
                        Err(e) => PreflightState::Failed(e),
                        Ok(()) => match wait_for_active(
                            self.stream.as_ref(),
                            &stream_name,
                            self.config.active_poll_interval(),
                            &mut self.shutdown_rx,
                        )
                        .await
                        {
                            Ok(_) => PreflightState::Ready,
                            Err(e) => PreflightState::Failed(e),
                        },
                    }
                }
                PreflightState::Ready => {
                    info!(stream = %stream_name, "shard level metrics enabled");
                    return Ok(());
                }
                PreflightState::Failed(e) => {
                    error!(stream = %stream_name, error = %e, "preflight failed");
                    return Err(e);
                }
            };
        }
    }

    /// Run one snapshot → collect → decide → change cycle.
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.set_phase(SessionPhase::Collecting);
        let stream_name = self.config.stream_name.clone();

        let partitions = match topology::snapshot(self.stream.as_ref(), &stream_name).await {
            Ok(p) => p,
            Err(e) => {
                warn!(stream = %stream_name, error = %e, "describe failed, retrying next cycle");
                return CycleReport {
                    partitions: 0,
                    newly_tracked: Vec::new(),
                    evaluation: None,
                    outcome: CycleOutcome::Aborted(e),
                    next_delay: self.config.auto_scale_delay(),
                };
            }
        };

        // One clock reading per cycle for both the query range and the windows.
        let wall_now = Utc::now();
        let now = Instant::now();
        let metrics = self.collector.collect(&partitions, wall_now).await;

        let newly_tracked: Vec<PartitionId> = partitions
            .iter()
            .filter(|p| metrics.contains(&p.id))
            .filter(|p| self.tracking.observe(&p.id, now))
            .map(|p| p.id.clone())
            .collect();
        if !newly_tracked.is_empty() {
            debug!(stream = %stream_name, shards = ?newly_tracked, "tracking new partitions");
        }

        self.set_phase(SessionPhase::Deciding);
        let windows = ScalingWindows::build(
            wall_now,
            self.config.scaling_split_duration,
            self.config.scaling_merge_duration,
        );
        let evaluation = self
            .policy
            .assess(&partitions, &metrics, &self.tracking, &windows, now);
        debug!(
            stream = %stream_name,
            partitions = partitions.len(),
            checks = evaluation.checks.len(),
            "evaluation complete"
        );

        let outcome = match &evaluation.decision {
            ScaleDecision::NoChange => {
                debug!(stream = %stream_name, "no scaling action needed");
                CycleOutcome::NoChange
            }
            ScaleDecision::Split {
                partition,
                new_starting_hash_key,
            } => {
                self.set_phase(SessionPhase::Changing);
                let changed = self
                    .executor
                    .split(partition, new_starting_hash_key, &mut self.shutdown_rx)
                    .await;
                CycleOutcome::Changed(changed)
            }
            ScaleDecision::Merge { lower, upper } => {
                self.set_phase(SessionPhase::Changing);
                let changed = self.executor.merge(lower, upper, &mut self.shutdown_rx).await;
                CycleOutcome::Changed(changed)
            }
        };

        let next_delay = match &outcome {
            CycleOutcome::Changed(change) => change.next_delay,
            _ => self.config.auto_scale_delay(),
        };

        CycleReport {
            partitions: partitions.len(),
            newly_tracked,
            evaluation: Some(evaluation),
            outcome,
            next_delay,
        }
    }

    async fn run(mut self) {
        info!(stream = %self.config.stream_name, "scaling loop started");

        while !*self.shutdown_rx.borrow() {
            let report = self.run_cycle().await;
            self.set_phase(SessionPhase::Cooldown);
            debug!(
                stream = %self.config.stream_name,
                next_secs = report.next_delay.as_secs(),
                "cycle complete"
            );
            if !self.sleep_or_shutdown(report.next_delay).await {
                break;
            }
        }

        self.set_phase(SessionPhase::Stopped);
        info!(stream = %self.config.stream_name, "scaling loop stopped");
    }

    /// Sleep for `delay`. Returns `false` if shutdown was requested.
    async fn sleep_or_shutdown(&mut self, delay: Duration) -> bool {
        if *self.shutdown_rx.borrow() {
            return false;
        }
        let deadline = Instant::now() + delay;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return true,
                changed = self.shutdown_rx.changed() => match changed {
                    Ok(()) if *self.shutdown_rx.borrow() => return false,
                    Ok(()) => {}
                    Err(_) => {
                        tokio::time::sleep_until(deadline).await;
                        return true;
                    }
                }
            }
        }
    }

    fn set_phase(&self, phase: SessionPhase) {
        self.phase_tx.send_replace(phase);
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase_tx.borrow()
    }

    pub fn tracking(&self) -> &ShardTrackingTable {
        &self.tracking
    }

    pub fn config(&self) -> &ScalingConfig {
        &self.config
    }
}

/// Control handle for a running session.
pub struct SessionHandle {
    stream_name: String,
    phase: watch::Receiver<SessionPhase>,
    shutdown: Arc<watch::Sender<bool>>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.borrow()
    }

    /// A receiver that sees every phase change.
    pub fn phase_watch(&self) -> watch::Receiver<SessionPhase> {
        self.phase.clone()
    }

    /// Ask the loop to stop at its next sleep or wait.
    pub fn shutdown(&self) {
        info!(stream = %self.stream_name, "shutdown requested");
        self.shutdown.send_replace(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the loop task to exit.
    pub async fn join(self) -> Result<(), JoinError> {
        self.task.await
    }

    /// Shut down and wait for the loop to exit.
    pub async fn stop(self) -> Result<(), JoinError> {
        self.shutdown();
        self.join().await
    }
}
