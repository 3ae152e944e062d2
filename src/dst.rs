//! Deterministic Simulation Testing for the relay
//!
//! Drives a complete relay (connector actor, control surface, delivery router)
//! against a simulated upstream and simulated targets, with a seeded workload
//! of configuration edits, commands, upstream events, connection breaks and
//! time jumps. Invariants are checked after every step.
//!
//! ```text
//! for seed in 0..N {
//!     let mut harness = RelayDSTHarness::new(RelayDSTConfig::moderate(seed)).await;
//!     harness.run(500).await;
//!     harness.check_invariants().await;   // violations carry the seed
//! }
//! ```
//!
//! Run under a paused current-thread tokio runtime
//! (`#[tokio::test(start_paused = true)]`): fault injection context is
//! thread-local, and paused time makes reconnect delays free.

use crate::buggify::{self, FaultConfig};
use crate::config::{Configuration, ConfigStore, Gate, InMemoryConfigStore};
use crate::connector::{ConnectionState, ConnectorOptions, RetryPolicy, Transition};
use crate::credential::{Credential, StoreCredentialProvider};
use crate::delivery::{DeliveryTarget, LocalRegistry, SimulatedTarget};
use crate::filter::EventFilter;
use crate::io::simulation::SimulatedRng;
use crate::io::{wall_clock_ms, Rng};
use crate::relay::{spawn_relay, RelayComponents, RelayHandle, RelayOptions};
use crate::status::StatusSnapshot;
use crate::transport::{SimulatedTransport, SseFrame, TransportError};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const EVENT_KIND: &str = "pause-equivalent";
const FILTER_IDS: &[&str] = &["RWD-1", "RWD-2", ""];
const EVENT_IDS: &[&str] = &["RWD-1", "RWD-2", "RWD-3"];

/// Configuration for relay DST
#[derive(Debug, Clone)]
pub struct RelayDSTConfig {
    pub seed: u64,
    pub faults: FaultConfig,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub delivery_deadline: Duration,
    pub targets: usize,
    /// Probability of a configuration edit
    pub config_change_probability: f64,
    /// Probability of an explicit Start/Stop/QueryStatus
    pub command_probability: f64,
    /// Probability of breaking the upstream connection
    pub sever_probability: f64,
    /// Probability of letting simulated time pass
    pub advance_probability: f64,
}

impl Default for RelayDSTConfig {
    fn default() -> Self {
        RelayDSTConfig {
            seed: 0,
            faults: FaultConfig::disabled(),
            max_attempts: 10,
            retry_delay: Duration::from_millis(500),
            delivery_deadline: Duration::from_millis(200),
            targets: 3,
            config_change_probability: 0.10,
            command_probability: 0.10,
            sever_probability: 0.03,
            advance_probability: 0.15,
        }
    }
}

impl RelayDSTConfig {
    pub fn new(seed: u64) -> Self {
        RelayDSTConfig {
            seed,
            ..Default::default()
        }
    }

    /// No injected faults
    pub fn calm(seed: u64) -> Self {
        Self::new(seed)
    }

    pub fn moderate(seed: u64) -> Self {
        RelayDSTConfig {
            seed,
            faults: FaultConfig::moderate(),
            sever_probability: 0.05,
            ..Default::default()
        }
    }

    /// Frequent faults and a small retry budget, so `Failed` is reached often
    pub fn chaos(seed: u64) -> Self {
        RelayDSTConfig {
            seed,
            faults: FaultConfig::chaos(),
            max_attempts: 3,
            sever_probability: 0.10,
            advance_probability: 0.25,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOperation {
    SetEnabled(bool),
    SetFilter(String),
    SetCredential(Option<String>),
    Start,
    Stop,
    QueryStatus,
    /// Well-formed event of the filtered kind
    Emit { identifier: String },
    EmitForeignKind { identifier: String },
    EmitMalformed,
    /// Upstream stream error
    Sever,
    /// Upstream ends the stream cleanly
    CloseUpstream,
    AdvanceTime(Duration),
}

#[derive(Debug, Clone)]
pub struct RelayDSTResult {
    pub seed: u64,
    pub total_operations: u64,
    pub events_emitted: u64,
    pub events_eligible: u64,
    pub deliveries: u64,
    pub transitions: u64,
    pub connect_attempts: u64,
    pub times_open: u64,
    pub times_failed: u64,
    pub faults_triggered: u64,
    pub invariant_violations: Vec<String>,
    pub history: Vec<RelayOperation>,
}

impl RelayDSTResult {
    pub fn new(seed: u64) -> Self {
        RelayDSTResult {
            seed,
            total_operations: 0,
            events_emitted: 0,
            events_eligible: 0,
            deliveries: 0,
            transitions: 0,
            connect_attempts: 0,
            times_open: 0,
            times_failed: 0,
            faults_triggered: 0,
            invariant_violations: Vec::new(),
            history: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.invariant_violations.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Seed {}: {} ops, {} events ({} eligible), {} deliveries, {} transitions, \
             {} connects, open {}x, failed {}x, {} faults, {} violations",
            self.seed,
            self.total_operations,
            self.events_emitted,
            self.events_eligible,
            self.deliveries,
            self.transitions,
            self.connect_attempts,
            self.times_open,
            self.times_failed,
            self.faults_triggered,
            self.invariant_violations.len()
        )
    }
}

pub struct RelayDSTHarness {
    config: RelayDSTConfig,
    rng: SimulatedRng,
    store: Arc<InMemoryConfigStore>,
    transport: SimulatedTransport,
    targets: Vec<Arc<SimulatedTarget>>,
    relay: Option<RelayHandle>,
    transitions: broadcast::Receiver<Transition>,
    last_state: ConnectionState,
    /// Sequence numbers that were eligible for delivery when emitted
    eligible: HashSet<u64>,
    next_seq: u64,
    /// Connect count when the connector last entered `Failed`
    failed_mark: Option<u64>,
    result: RelayDSTResult,
}

impl RelayDSTHarness {
    pub async fn new(config: RelayDSTConfig) -> Self {
        buggify::set_config(config.faults.clone());

        let mut rng = SimulatedRng::new(config.seed);
        let store = Arc::new(InMemoryConfigStore::default());
        let transport = SimulatedTransport::with_faults(rng.fork());

        let registry = Arc::new(LocalRegistry::new());
        let targets: Vec<_> = (0..config.targets)
            .map(|i| Arc::new(SimulatedTarget::with_faults(format!("target-{}", i), rng.fork())))
            .collect();
        for target in &targets {
            registry.register(target.clone());
        }

        let relay = spawn_relay(
            RelayComponents {
                transport: Arc::new(transport.clone()),
                credentials: Arc::new(StoreCredentialProvider::new(store.clone())),
                store: store.clone(),
                registry,
            },
            RelayOptions {
                connector: ConnectorOptions {
                    max_attempts: config.max_attempts,
                    retry_policy: RetryPolicy::Fixed {
                        delay: config.retry_delay,
                    },
                    connect_timeout: Duration::from_secs(10),
                },
                filter: EventFilter::new(EVENT_KIND, "rewardId"),
                delivery_deadline: config.delivery_deadline,
            },
        );
        let transitions = relay.connector().subscribe_transitions();

        let mut harness = RelayDSTHarness {
            result: RelayDSTResult::new(config.seed),
            config,
            rng,
            store,
            transport,
            targets,
            relay: Some(relay),
            transitions,
            last_state: ConnectionState::Idle,
            eligible: HashSet::new(),
            next_seq: 0,
            failed_mark: None,
        };
        settle().await;
        harness.check_step();
        harness
    }

    pub async fn run(&mut self, operations: usize) {
        for _ in 0..operations {
            let op = self.next_operation();
            self.execute(op.clone()).await;
            self.result.history.push(op);
            self.result.total_operations += 1;
            settle().await;
            self.check_step();
        }
    }

    fn next_operation(&mut self) -> RelayOperation {
        let c = &self.config;
        let roll = self.rng.next_u64() as f64 / u64::MAX as f64;
        let config_edge = c.config_change_probability;
        let command_edge = config_edge + c.command_probability;
        let sever_edge = command_edge + c.sever_probability;
        let advance_edge = sever_edge + c.advance_probability;

        if roll < config_edge {
            match self.rng.gen_range(0, 3) {
                0 => RelayOperation::SetEnabled(self.rng.gen_bool(0.7)),
                1 => {
                    let i = self.rng.choose_index(FILTER_IDS.len());
                    RelayOperation::SetFilter(FILTER_IDS[i].to_string())
                }
                _ => {
                    let token = if self.rng.gen_bool(0.8) {
                        Some(format!("token-{}", self.rng.gen_range(0, 4)))
                    } else {
                        None
                    };
                    RelayOperation::SetCredential(token)
                }
            }
        } else if roll < command_edge {
            match self.rng.gen_range(0, 3) {
                0 => RelayOperation::Start,
                1 => RelayOperation::Stop,
                _ => RelayOperation::QueryStatus,
            }
        } else if roll < sever_edge {
            if self.rng.gen_bool(0.5) {
                RelayOperation::Sever
            } else {
                RelayOperation::CloseUpstream
            }
        } else if roll < advance_edge {
            let max = self.config.retry_delay.as_millis() as u64 * 2;
            RelayOperation::AdvanceTime(Duration::from_millis(self.rng.gen_range(1, max.max(2))))
        } else {
            let identifier = EVENT_IDS[self.rng.choose_index(EVENT_IDS.len())].to_string();
            match self.rng.gen_range(0, 10) {
                0 => RelayOperation::EmitMalformed,
                1 => RelayOperation::EmitForeignKind { identifier },
                _ => RelayOperation::Emit { identifier },
            }
        }
    }

    async fn execute(&mut self, op: RelayOperation) {
        match op {
            RelayOperation::SetEnabled(enabled) => {
                self.store.update(|c| c.enabled = enabled);
            }
            RelayOperation::SetFilter(filter_id) => {
                self.store.update(|c| c.filter_id = filter_id);
            }
            RelayOperation::SetCredential(token) => {
                self.store.update(|c| c.credential = token.map(Credential::new));
            }
            RelayOperation::Start | RelayOperation::Stop => {
                let Some(relay) = self.relay.as_ref() else {
                    return;
                };
                let surface = relay.surface();
                let outcome = if op == RelayOperation::Start {
                    surface.start().await
                } else {
                    surface.stop().await
                };
                if let Err(e) = outcome {
                    self.violation(format!("{:?} failed: {}", op, e));
                }
            }
            RelayOperation::QueryStatus => {
                if let Some(relay) = self.relay.as_ref() {
                    let query = relay.surface().query_status();
                    let snapshot = relay.status().snapshot();
                    if query.connected != snapshot.connected()
                        || query.retry_attempts != snapshot.retry_attempts
                    {
                        self.violation(format!(
                            "QueryStatus {:?} disagrees with snapshot {:?}",
                            query, snapshot
                        ));
                    }
                }
            }
            RelayOperation::Emit { identifier } => {
                let seq = self.next_seq();
                let data = serde_json::json!({ "rewardId": identifier, "seq": seq }).to_string();
                if self.transport.emit(SseFrame::named(EVENT_KIND, data)) {
                    self.result.events_emitted += 1;
                    let filter_id = self.store.snapshot().filter_id;
                    if !filter_id.is_empty() && filter_id == identifier {
                        self.eligible.insert(seq);
                        self.result.events_eligible += 1;
                    }
                }
            }
            RelayOperation::EmitForeignKind { identifier } => {
                let seq = self.next_seq();
                let data = serde_json::json!({ "rewardId": identifier, "seq": seq }).to_string();
                if self.transport.emit(SseFrame::named("heartbeat", data)) {
                    self.result.events_emitted += 1;
                }
            }
            RelayOperation::EmitMalformed => {
                if self.transport.emit(SseFrame::named(EVENT_KIND, "{not json")) {
                    self.result.events_emitted += 1;
                }
            }
            RelayOperation::Sever => {
                self.transport
                    .sever(TransportError::Stream("simulated reset".to_string()));
            }
            RelayOperation::CloseUpstream => {
                self.transport.close();
            }
            RelayOperation::AdvanceTime(duration) => {
                tokio::time::sleep(duration).await;
            }
        }
    }

    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn violation(&mut self, message: String) {
        self.result
            .invariant_violations
            .push(format!("seed {} op {}: {}", self.config.seed, self.result.total_operations, message));
    }

    fn snapshot(&self) -> Option<StatusSnapshot> {
        self.relay.as_ref().map(|r| r.status().snapshot())
    }

    /// Invariants that hold once the relay has quiesced after an operation
    fn check_step(&mut self) {
        self.drain_transitions();

        let Some(status) = self.snapshot() else {
            return;
        };
        let connects = self.transport.stats().connect_attempts;

        // Retry budget
        if status.retry_attempts > status.max_attempts {
            self.violation(format!(
                "retry attempts {} exceed max {}",
                status.retry_attempts, status.max_attempts
            ));
        }
        match status.state {
            ConnectionState::Open | ConnectionState::Idle if status.retry_attempts != 0 => {
                self.violation(format!(
                    "{} with {} retry attempts",
                    status.state, status.retry_attempts
                ));
            }
            ConnectionState::Reconnecting
                if status.retry_attempts == 0 || status.retry_attempts >= status.max_attempts =>
            {
                self.violation(format!(
                    "reconnecting with {} of {} attempts",
                    status.retry_attempts, status.max_attempts
                ));
            }
            ConnectionState::Failed if status.retry_attempts != status.max_attempts => {
                self.violation(format!(
                    "failed with {} of {} attempts",
                    status.retry_attempts, status.max_attempts
                ));
            }
            _ => {}
        }

        // Gating: a live upstream connection only while the gate permits it
        let config: Configuration = self.store.snapshot();
        let gate = config.gate(wall_clock_ms());
        let connected = self.transport.is_connected();
        if connected && gate != Gate::Permitted {
            self.violation(format!("upstream connected while gate is {:?}", gate));
        }
        if status.state == ConnectionState::Open && !connected {
            self.violation("open without a live upstream connection".to_string());
        }
        if connected && !matches!(status.state, ConnectionState::Open) {
            self.violation(format!("upstream connected while {}", status.state));
        }

        // No automatic reconnects once failed
        if status.state == ConnectionState::Failed {
            match self.failed_mark {
                Some(mark) if connects != mark => {
                    self.violation(format!(
                        "{} connect attempts while failed",
                        connects - mark
                    ));
                }
                Some(_) => {}
                None => {
                    self.failed_mark = Some(connects);
                    self.result.times_failed += 1;
                }
            }
        } else {
            self.failed_mark = None;
        }

        self.check_deliveries();
    }

    fn drain_transitions(&mut self) {
        loop {
            match self.transitions.try_recv() {
                Ok(transition) => {
                    self.result.transitions += 1;
                    if transition.from != self.last_state {
                        self.violation(format!(
                            "transition {:?} does not start from {}",
                            transition, self.last_state
                        ));
                    }
                    if !is_valid_transition(transition.from, transition.to) {
                        self.violation(format!("illegal transition {:?}", transition));
                    }
                    if transition.to == ConnectionState::Open {
                        self.result.times_open += 1;
                    }
                    self.last_state = transition.to;
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    self.violation(format!("transition feed lagged by {}", skipped));
                    if let Some(status) = self.snapshot() {
                        self.last_state = status.state;
                    }
                }
                Err(_) => break,
            }
        }
    }

    /// Only eligible events are delivered, at most once per target
    fn check_deliveries(&mut self) {
        let mut problems = Vec::new();
        let mut total = 0u64;
        for target in &self.targets {
            let mut seen: HashMap<u64, usize> = HashMap::new();
            for event in target.received() {
                total += 1;
                let Some(seq) = event.payload.get("seq").and_then(|s| s.as_u64()) else {
                    problems.push(format!("{} received an event without seq", target.id()));
                    continue;
                };
                if !self.eligible.contains(&seq) {
                    problems.push(format!("{} received ineligible event {}", target.id(), seq));
                }
                *seen.entry(seq).or_insert(0) += 1;
            }
            for (seq, count) in seen {
                if count > 1 {
                    problems.push(format!("{} received event {} {} times", target.id(), seq, count));
                }
            }
        }
        self.result.deliveries = total;
        for problem in problems {
            self.violation(problem);
        }
    }

    /// End-of-run checks, then shut the relay down and verify release
    pub async fn check_invariants(&mut self) {
        // Let outstanding fan-outs finish or hit their deadline
        tokio::time::sleep(self.config.delivery_deadline * 2).await;
        self.check_step();

        // Without injected faults a permitted start must reach Open
        if !self.config.faults.enabled {
            self.store.replace(Configuration {
                enabled: true,
                filter_id: "RWD-1".to_string(),
                credential: Some(Credential::new("token-final")),
            });
            settle().await;
            if let Some(relay) = self.relay.as_ref() {
                let _ = relay.surface().start().await;
            }
            settle().await;
            self.check_step();
            let state = self.snapshot().map(|s| s.state);
            if state != Some(ConnectionState::Open) {
                self.violation(format!("permitted start ended in {:?}", state));
            }
        }

        if let Some(relay) = self.relay.take() {
            relay.shutdown().await;
        }
        if self.transport.is_connected() {
            self.violation("upstream connection survived shutdown".to_string());
        }

        self.result.connect_attempts = self.transport.stats().connect_attempts;
        self.result.faults_triggered = buggify::get_stats().total_triggers();
    }

    pub fn result(&self) -> &RelayDSTResult {
        &self.result
    }

    pub fn into_result(self) -> RelayDSTResult {
        self.result
    }
}

/// Quiesce: every runnable task gets to run before time moves on
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

fn is_valid_transition(from: ConnectionState, to: ConnectionState) -> bool {
    use ConnectionState::*;
    matches!(
        (from, to),
        (Idle, Connecting)
            | (Connecting, Open)
            | (Connecting, Reconnecting)
            | (Open, Reconnecting)
            | (Reconnecting, Connecting)
            | (Reconnecting, Failed)
            | (Failed, Connecting)
            | (Connecting, Idle)
            | (Open, Idle)
            | (Reconnecting, Idle)
            | (Failed, Idle)
    )
}

/// Run a batch of DST runs with consecutive seeds
pub async fn run_dst_batch(
    base_seed: u64,
    count: usize,
    ops_per_run: usize,
    config_fn: impl Fn(u64) -> RelayDSTConfig,
) -> Vec<RelayDSTResult> {
    let mut results = Vec::with_capacity(count);
    for i in 0..count {
        let mut harness = RelayDSTHarness::new(config_fn(base_seed + i as u64)).await;
        harness.run(ops_per_run).await;
        harness.check_invariants().await;
        results.push(harness.into_result());
    }
    results
}

pub fn summarize_batch(results: &[RelayDSTResult]) -> String {
    let total = results.len();
    let passed = results.iter().filter(|r| r.is_success()).count();
    let failed_seeds: Vec<u64> = results
        .iter()
        .filter(|r| !r.is_success())
        .map(|r| r.seed)
        .collect();

    let total_ops: u64 = results.iter().map(|r| r.total_operations).sum();
    let deliveries: u64 = results.iter().map(|r| r.deliveries).sum();
    let failures: u64 = results.iter().map(|r| r.times_failed).sum();

    let mut summary = format!(
        "Batch: {}/{} passed, {} total ops, {} deliveries, {} exhausted budgets",
        passed, total, total_ops, deliveries, failures
    );
    if !failed_seeds.is_empty() {
        summary.push_str(&format!("\nFailed seeds: {:?}", failed_seeds));
    }
    summary
}
