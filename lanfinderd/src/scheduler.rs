//! Discovery rounds and their publication.
//!
//! A round runs every probe concurrently, parses what came back, merges it into
//! the directory and swaps in a new immutable snapshot. Rounds are serialized by
//! a single lock around the directory; readers only ever see whole snapshots.

use std::collections::BTreeMap;
use std::sync::Arc;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use shared::types::{Protocol, Snapshot};
use tokio::sync::{watch, Mutex, Notify};
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use crate::aggregator::hash::compute_hash;
use crate::aggregator::{Aggregator, RetentionPolicy};
use crate::config::{Config, ScheduleMode};
use crate::error::{FailureKind, ProbeError, RoundError};
use crate::parse::parse;
use crate::probe::{MdnsProbe, Probe, SsdpProbe};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundState {
    Idle,
    Running,
    Aggregating,
    Published,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceFailure {
    pub protocol: Protocol,
    pub kind: FailureKind,
    pub message: String,
}

/// Diagnostics for one round.
#[derive(Debug, Clone, Serialize)]
pub struct RoundReport {
    pub round: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// False when every probe failed and the previous snapshot was kept
    pub published: bool,
    pub devices_published: usize,
    /// Distinct datagrams received per protocol
    pub responses: BTreeMap<Protocol, usize>,
    pub parse_failures: BTreeMap<Protocol, usize>,
    pub failures: Vec<SourceFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub state: RoundState,
    pub rounds_completed: u64,
    pub last_report: Option<RoundReport>,
    pub last_error: Option<String>,
}

/// A probe and the window it gets each round.
#[derive(Clone)]
pub struct ScheduledProbe {
    pub probe: Arc<dyn Probe>,
    pub timeout: Duration,
}

struct Directory {
    aggregator: Aggregator,
    rounds: u64,
}

struct Inner {
    probes: Vec<ScheduledProbe>,
    directory: Mutex<Directory>,
    snapshot_tx: watch::Sender<Arc<Snapshot>>,
    status_tx: watch::Sender<SchedulerStatus>,
    wake: Notify,
    shutdown: CancellationToken,
}

/// Handle to the discovery engine
#[derive(Clone)]
pub struct Discovery {
    inner: Arc<Inner>,
}

impl Discovery {
    pub fn new(probes: Vec<ScheduledProbe>, policy: RetentionPolicy, shutdown: CancellationToken) -> Self {
        let (snapshot_tx, _) = watch::channel(Arc::new(Snapshot {
            hash: compute_hash(&[]),
            ..Snapshot::default()
        }));
        let (status_tx, _) = watch::channel(SchedulerStatus {
            state: RoundState::Idle,
            rounds_completed: 0,
            last_report: None,
            last_error: None,
        });

        Self {
            inner: Arc::new(Inner {
                probes,
                directory: Mutex::new(Directory {
                    aggregator: Aggregator::new(policy),
                    rounds: 0,
                }),
                snapshot_tx,
                status_tx,
                wake: Notify::new(),
                shutdown,
            }),
        }
    }

    /// Engine with the real SSDP and mDNS probes
    pub fn from_config(config: &Config, shutdown: CancellationToken) -> Self {
        let probes = vec![
            ScheduledProbe {
                probe: Arc::new(SsdpProbe::new(&config.discovery)),
                timeout: config.discovery.ssdp_timeout(),
            },
            ScheduledProbe {
                probe: Arc::new(MdnsProbe::new(&config.discovery)),
                timeout: config.discovery.mdns_timeout(),
            },
        ];
        Self::new(probes, RetentionPolicy::from(&config.retention), shutdown)
    }

    /// The current published directory
    pub fn get_snapshot(&self) -> Arc<Snapshot> {
        self.inner.snapshot_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.inner.snapshot_tx.subscribe()
    }

    pub fn status(&self) -> SchedulerStatus {
        self.inner.status_tx.borrow().clone()
    }

    /// Fire-and-forget: wakes the scheduler loop. Repeated requests coalesce.
    pub fn request_round(&self) {
        self.inner.wake.notify_one();
    }

    /// Runs one round and waits for it. Concurrent callers queue behind each other.
    ///
    /// Dropping the returned future, or shutting down, abandons the round:
    /// sockets are closed and nothing is published.
    pub async fn trigger_round(&self) -> Result<RoundReport, RoundError> {
        let shutdown = self.inner.shutdown.clone();

        let mut directory = tokio::select! {
            _ = shutdown.cancelled() => return Err(RoundError::Cancelled),
            directory = self.inner.directory.lock() => directory,
        };

        let mut guard = IdleOnDrop {
            status_tx: &self.inner.status_tx,
            armed: true,
        };
        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                tracing::info!("Discovery round cancelled");
                Err(RoundError::Cancelled)
            }
            result = self.run_round(&mut directory) => result,
        };
        guard.armed = false;

        self.inner.status_tx.send_modify(|status| {
            status.state = RoundState::Idle;
            match &result {
                Ok(report) => {
                    status.rounds_completed += 1;
                    status.last_report = Some(report.clone());
                    status.last_error = None;
                }
                Err(e) => status.last_error = Some(e.to_string()),
            }
        });
        result
    }

    async fn run_round(&self, directory: &mut Directory) -> Result<RoundReport, RoundError> {
        directory.rounds += 1;
        let round = directory.rounds;
        let started_at = Utc::now();

        self.set_state(RoundState::Running);
        tracing::info!("Starting discovery round {}", round);

        let results = join_all(self.inner.probes.iter().map(|scheduled| async move {
            let protocol = scheduled.probe.protocol();
            (protocol, scheduled.probe.discover(scheduled.timeout).await)
        }))
        .await;

        self.set_state(RoundState::Aggregating);

        let mut report = RoundReport {
            round,
            started_at,
            finished_at: started_at,
            published: false,
            devices_published: 0,
            responses: BTreeMap::new(),
            parse_failures: BTreeMap::new(),
            failures: Vec::new(),
        };
        let mut errors: Vec<ProbeError> = Vec::new();
        let mut parsed = Vec::new();

        for (protocol, result) in results {
            match result {
                Ok(responses) => {
                    report.responses.insert(protocol, responses.len());
                    for raw in &responses {
                        match parse(protocol, raw) {
                            Ok(devices) => parsed.extend(devices),
                            Err(e) => {
                                *report.parse_failures.entry(protocol).or_default() += 1;
                                tracing::warn!("Dropping {} response from {}: {}", protocol, raw.sender, e);
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("{} probe failed: {}", protocol, e);
                    report.failures.push(SourceFailure {
                        protocol,
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                    errors.push(e);
                }
            }
        }

        if !errors.is_empty() && errors.len() == self.inner.probes.len() {
            if errors.iter().all(|e| e.kind() == FailureKind::NetworkUnavailable) {
                return Err(RoundError::NoUsableSocket(errors));
            }
            tracing::warn!("Every probe failed in round {}, keeping the previous snapshot", round);
            report.finished_at = Utc::now();
            return Ok(report);
        }

        let now = Utc::now();
        for device in parsed {
            directory.aggregator.ingest(device);
        }
        let devices = directory.aggregator.finish_round(now);
        let aliases = directory.aggregator.aliases();

        let version = self.inner.snapshot_tx.borrow().version + 1;
        report.devices_published = devices.len();
        report.published = true;
        report.finished_at = now;

        let snapshot = Snapshot {
            version,
            published_at: Some(now),
            hash: compute_hash(&devices),
            devices,
            aliases,
        };
        self.inner.snapshot_tx.send_replace(Arc::new(snapshot));
        self.set_state(RoundState::Published);

        if report.devices_published == 0 && report.failures.is_empty() {
            tracing::info!("Round {} complete: no devices found", round);
        } else {
            tracing::info!(
                "Round {} complete: {} devices published (version {})",
                round,
                report.devices_published,
                version
            );
        }
        Ok(report)
    }

    fn set_state(&self, state: RoundState) {
        self.inner.status_tx.send_modify(|status| status.state = state);
    }
}

/// Returns the status to idle if a round is abandoned mid-flight.
struct IdleOnDrop<'a> {
    status_tx: &'a watch::Sender<SchedulerStatus>,
    armed: bool,
}

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.status_tx.send_modify(|status| status.state = RoundState::Idle);
        }
    }
}

/// Scheduler loop: rounds on every tick in continuous mode, and whenever
/// [`Discovery::request_round`] is called.
pub async fn run(discovery: Discovery, mode: ScheduleMode, interval: Duration) {
    let shutdown = discovery.inner.shutdown.clone();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!("Discovery scheduler started in {:?} mode", mode);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick(), if mode == ScheduleMode::Continuous => {}
            _ = discovery.inner.wake.notified() => {}
        }

        match discovery.trigger_round().await {
            Ok(_) => {}
            Err(RoundError::Cancelled) => break,
            Err(e) => tracing::error!("Discovery round failed: {}", e),
        }
    }

    tracing::info!("Discovery scheduler shutting down");
}
