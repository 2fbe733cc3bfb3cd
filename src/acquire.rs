//! Microphone acquisition negotiator
//!
//! Platform permission models disagree about when a microphone request will
//! succeed, so acquisition is a fixed-priority sequence of fallback
//! strategies, each probing one technique. The negotiator runs them in
//! order, records per-strategy diagnostics, and owns the long-lived stream
//! produced by the persistent-hold strategy.

use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use crate::media::{lock_or_recover, AudioStream, MediaBackend, PermissionState, StreamConstraints};

/// Fixed wait between device enumeration and the follow-up request; some
/// platforms race discovery against acquisition without it.
pub const SETTLE_DELAY: Duration = Duration::from_millis(300);

/// Diagnostic log ring size
const LOG_CAPACITY: usize = 50;

/// Lifecycle of one strategy's most recent probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyState {
    /// Not yet attempted since the last reset
    #[default]
    Pending,
    /// Probe in flight
    Testing,
    /// Probe succeeded
    Success,
    /// Probe failed
    Failed,
}

/// A strategy's state plus its last diagnostic message
#[derive(Debug, Clone, Default)]
pub struct StrategyStatus {
    /// Probe lifecycle state
    pub state: StrategyState,
    /// Last diagnostic message from the probe
    pub message: String,
}

/// Result of one probe attempt
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    /// Whether the strategy's technique worked
    pub success: bool,
    /// Diagnostic message for the status panel
    pub message: String,
}

impl ProbeOutcome {
    /// Successful probe
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    /// Failed probe; failures are always captured here, never raised
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Shared context handed to every probe
#[derive(Clone)]
pub struct ProbeCx {
    backend: Arc<dyn MediaBackend>,
    held: Arc<Mutex<Option<Arc<AudioStream>>>>,
}

type ProbeFuture = Pin<Box<dyn Future<Output = ProbeOutcome> + Send + 'static>>;
type BoxedProbe = Box<dyn Fn(ProbeCx) -> ProbeFuture + Send + Sync>;

/// One acquisition technique: an id, a description, and an async probe
///
/// The strategy table is data, not branching; tests substitute fake probes
/// via [`Negotiator::with_strategies`].
pub struct Strategy {
    id: u8,
    description: &'static str,
    probe: BoxedProbe,
}

impl Strategy {
    /// Build a strategy from any async probe function
    pub fn new<F, Fut>(id: u8, description: &'static str, probe: F) -> Self
    where
        F: Fn(ProbeCx) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ProbeOutcome> + Send + 'static,
    {
        Self {
            id,
            description,
            probe: Box::new(move |cx| Box::pin(probe(cx))),
        }
    }

    /// Strategy identifier (priority order follows table order, not id)
    #[must_use]
    pub const fn id(&self) -> u8 {
        self.id
    }

    /// Human description for diagnostics
    #[must_use]
    pub const fn description(&self) -> &'static str {
        self.description
    }
}

/// Tries acquisition strategies in priority order until one works
///
/// Owns the stream parked by the persistent-hold strategy; sessions borrow
/// it, and [`Negotiator::release_held`] (or drop) tears it down.
pub struct Negotiator {
    strategies: Vec<Strategy>,
    statuses: Vec<StrategyStatus>,
    logs: VecDeque<String>,
    cx: ProbeCx,
}

impl Negotiator {
    /// Negotiator with the standard four-strategy table
    #[must_use]
    pub fn new(backend: Arc<dyn MediaBackend>) -> Self {
        Self::with_strategies(backend, default_strategies())
    }

    /// Negotiator over a custom strategy table (tests substitute fakes here)
    #[must_use]
    pub fn with_strategies(backend: Arc<dyn MediaBackend>, strategies: Vec<Strategy>) -> Self {
        let statuses = vec![StrategyStatus::default(); strategies.len()];
        Self {
            strategies,
            statuses,
            logs: VecDeque::new(),
            cx: ProbeCx {
                backend,
                held: Arc::new(Mutex::new(None)),
            },
        }
    }

    /// Run exactly one strategy's probe
    ///
    /// Never fails out of the probe itself; every failure lands in the
    /// returned outcome and the strategy's status.
    pub async fn probe(&mut self, id: u8) -> ProbeOutcome {
        let Some(idx) = self.strategies.iter().position(|s| s.id == id) else {
            self.push_log(format!("[strategy {id}] unknown strategy id"));
            return ProbeOutcome::fail(format!("unknown strategy id {id}"));
        };

        let description = self.strategies[idx].description;
        self.statuses[idx] = StrategyStatus {
            state: StrategyState::Testing,
            message: "probing...".to_owned(),
        };
        self.push_log(format!("[strategy {id}] testing — {description}"));

        let future = (self.strategies[idx].probe)(self.cx.clone());
        let outcome = future.await;

        self.statuses[idx] = StrategyStatus {
            state: if outcome.success {
                StrategyState::Success
            } else {
                StrategyState::Failed
            },
            message: outcome.message.clone(),
        };
        self.push_log(format!(
            "[strategy {id}] {} — {}",
            if outcome.success { "success" } else { "failed" },
            outcome.message
        ));

        outcome
    }

    /// Reset every status to pending, then run all strategies sequentially
    ///
    /// Sequential on purpose: concurrent probes compound permission-prompt
    /// races. Returns per-strategy results and logs a summary line.
    pub async fn probe_all(&mut self) -> BTreeMap<u8, bool> {
        self.push_log("testing all strategies".to_owned());
        for status in &mut self.statuses {
            *status = StrategyStatus::default();
        }

        let ids: Vec<u8> = self.strategies.iter().map(|s| s.id).collect();
        let mut results = BTreeMap::new();
        for id in ids {
            let outcome = self.probe(id).await;
            results.insert(id, outcome.success);
        }

        let winners: Vec<String> = results
            .iter()
            .filter(|(_, ok)| **ok)
            .map(|(id, _)| id.to_string())
            .collect();
        if winners.is_empty() {
            self.push_log("all strategies failed".to_owned());
        } else {
            self.push_log(format!("working strategies: {}", winners.join(", ")));
        }

        results
    }

    /// Acquire a microphone stream, trying strategies in priority order
    ///
    /// A still-active stream held by the persistent-hold strategy is
    /// returned immediately, with no new prompt. Returns `None` once every
    /// strategy is exhausted; diagnostics stay available via
    /// [`Negotiator::statuses`] and [`Negotiator::logs`].
    pub async fn acquire(&mut self) -> Option<Arc<AudioStream>> {
        self.push_log("attempting microphone access".to_owned());

        if let Some(held) = self.active_held() {
            self.push_log("reusing held persistent stream".to_owned());
            return Some(held);
        }

        let ids: Vec<(u8, &'static str)> = self
            .strategies
            .iter()
            .map(|s| (s.id, s.description))
            .collect();

        for (id, description) in ids {
            self.push_log(format!("trying strategy {id} ({description})"));
            if !self.probe(id).await.success {
                continue;
            }

            // The persistent-hold strategy parks its stream instead of
            // closing it; hand that out directly.
            if let Some(held) = self.active_held() {
                self.push_log(format!("strategy {id} succeeded — using held stream"));
                return Some(held);
            }

            let backend = Arc::clone(&self.cx.backend);
            let opened =
                tokio::task::spawn_blocking(move || backend.open_stream(&StreamConstraints::default()))
                    .await;
            match opened {
                Ok(Ok(stream)) => {
                    self.push_log(format!("strategy {id} succeeded — stream opened"));
                    return Some(Arc::new(stream));
                }
                Ok(Err(e)) => {
                    self.push_log(format!("strategy {id} probe passed but stream open failed: {e}"));
                }
                Err(e) => {
                    self.push_log(format!("strategy {id} stream open aborted: {e}"));
                }
            }
        }

        self.push_log("all strategies failed to acquire microphone".to_owned());
        None
    }

    /// Status of one strategy
    #[must_use]
    pub fn status(&self, id: u8) -> Option<&StrategyStatus> {
        self.strategies
            .iter()
            .position(|s| s.id == id)
            .map(|idx| &self.statuses[idx])
    }

    /// All statuses in table order
    #[must_use]
    pub fn statuses(&self) -> Vec<(u8, StrategyStatus)> {
        self.strategies
            .iter()
            .zip(&self.statuses)
            .map(|(s, status)| (s.id, status.clone()))
            .collect()
    }

    /// Whether every strategy's last probe failed
    #[must_use]
    pub fn all_failed(&self) -> bool {
        !self.statuses.is_empty()
            && self
                .statuses
                .iter()
                .all(|s| s.state == StrategyState::Failed)
    }

    /// Timestamped diagnostic log, newest last, capped at 50 entries
    #[must_use]
    pub const fn logs(&self) -> &VecDeque<String> {
        &self.logs
    }

    /// Release the stream held by the persistent-hold strategy, if any
    pub fn release_held(&mut self) {
        if let Some(stream) = lock_or_recover(&self.cx.held).take() {
            debug!("releasing held persistent stream");
            stream.close();
        }
    }

    fn active_held(&self) -> Option<Arc<AudioStream>> {
        let mut held = lock_or_recover(&self.cx.held);
        match held.as_ref() {
            Some(stream) if stream.is_active() => Some(Arc::clone(stream)),
            Some(_) => {
                // Stream died underneath us; forget it
                *held = None;
                None
            }
            None => None,
        }
    }

    fn push_log(&mut self, message: String) {
        debug!("{message}");
        let entry = format!("[{}] {message}", chrono::Local::now().format("%H:%M:%S"));
        if self.logs.len() == LOG_CAPACITY {
            self.logs.pop_front();
        }
        self.logs.push_back(entry);
    }
}

impl Drop for Negotiator {
    fn drop(&mut self) {
        self.release_held();
    }
}

/// The standard strategy table, in priority order
#[must_use]
pub fn default_strategies() -> Vec<Strategy> {
    vec![
        Strategy::new(1, "permission pre-check", probe_permission),
        Strategy::new(2, "device warm-up", probe_device_warmup),
        Strategy::new(3, "constrained request", probe_constrained),
        Strategy::new(4, "persistent hold", probe_persistent_hold),
    ]
}

/// Strategy 1: query the permission state before requesting media
///
/// Granted short-circuits to success, denied fails fast, anything else falls
/// through to a real request.
async fn probe_permission(cx: ProbeCx) -> ProbeOutcome {
    let backend = Arc::clone(&cx.backend);
    let state = match tokio::task::spawn_blocking(move || backend.query_permission()).await {
        Ok(Ok(state)) => state,
        Ok(Err(e)) => return ProbeOutcome::fail(format!("permission query failed: {e}")),
        Err(e) => return ProbeOutcome::fail(format!("permission query aborted: {e}")),
    };

    match state {
        PermissionState::Granted => ProbeOutcome::ok("permission already granted"),
        PermissionState::Denied => ProbeOutcome::fail("permission denied"),
        PermissionState::Prompt => match open_and_close(&cx, StreamConstraints::default()).await {
            Ok(()) => ProbeOutcome::ok("microphone granted on request"),
            Err(e) => ProbeOutcome::fail(e),
        },
    }
}

/// Strategy 2: enumerate input devices, settle, then request
///
/// Enumeration forces device discovery on hosts that initialize lazily; the
/// settle delay keeps discovery and acquisition from racing.
async fn probe_device_warmup(cx: ProbeCx) -> ProbeOutcome {
    let backend = Arc::clone(&cx.backend);
    let inputs = match tokio::task::spawn_blocking(move || backend.enumerate_inputs()).await {
        Ok(Ok(inputs)) => inputs,
        Ok(Err(e)) => return ProbeOutcome::fail(format!("device enumeration failed: {e}")),
        Err(e) => return ProbeOutcome::fail(format!("device enumeration aborted: {e}")),
    };

    if inputs.is_empty() {
        return ProbeOutcome::fail("no audio inputs found");
    }

    tokio::time::sleep(SETTLE_DELAY).await;

    match open_and_close(&cx, StreamConstraints::default()).await {
        Ok(()) => ProbeOutcome::ok(format!("{} devices found", inputs.len())),
        Err(e) => ProbeOutcome::fail(e),
    }
}

/// Strategy 3: request with explicit quality constraints
///
/// Some hosts reject an unconstrained request but accept a qualified one.
async fn probe_constrained(cx: ProbeCx) -> ProbeOutcome {
    match open_and_close(&cx, StreamConstraints::voice()).await {
        Ok(()) => ProbeOutcome::ok("constrained request accepted"),
        Err(e) => ProbeOutcome::fail(e),
    }
}

/// Strategy 4: request and keep the stream open
///
/// Holding the stream trades resource usage for skipping permission
/// renegotiation on the next acquire. Any previously held stream is
/// released first.
async fn probe_persistent_hold(cx: ProbeCx) -> ProbeOutcome {
    if let Some(old) = lock_or_recover(&cx.held).take() {
        old.close();
    }

    let backend = Arc::clone(&cx.backend);
    let opened =
        tokio::task::spawn_blocking(move || backend.open_stream(&StreamConstraints::default()))
            .await;
    match opened {
        Ok(Ok(stream)) => {
            let channels = stream.channels();
            *lock_or_recover(&cx.held) = Some(Arc::new(stream));
            ProbeOutcome::ok(format!("stream held open ({channels} channels)"))
        }
        Ok(Err(e)) => ProbeOutcome::fail(format!("{e}")),
        Err(e) => ProbeOutcome::fail(format!("stream open aborted: {e}")),
    }
}

/// Open a stream just to prove access, then release it immediately
async fn open_and_close(cx: &ProbeCx, constraints: StreamConstraints) -> Result<(), String> {
    let backend = Arc::clone(&cx.backend);
    match tokio::task::spawn_blocking(move || backend.open_stream(&constraints)).await {
        Ok(Ok(stream)) => {
            stream.close();
            Ok(())
        }
        Ok(Err(e)) => Err(format!("{e}")),
        Err(e) => Err(format!("stream open aborted: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{InputDevice, MediaError, MockMediaBackend};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fail_strategy(id: u8, calls: &Arc<AtomicUsize>) -> Strategy {
        let calls = Arc::clone(calls);
        Strategy::new(id, "scripted failure", move |_cx| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                ProbeOutcome::fail("scripted failure")
            }
        })
    }

    fn ok_strategy(id: u8, calls: &Arc<AtomicUsize>) -> Strategy {
        let calls = Arc::clone(calls);
        Strategy::new(id, "scripted success", move |_cx| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                ProbeOutcome::ok("scripted success")
            }
        })
    }

    fn hold_strategy(id: u8) -> Strategy {
        Strategy::new(id, "scripted hold", |cx: ProbeCx| async move {
            let (_, stream) = AudioStream::channel(8, 16_000, 1);
            *lock_or_recover(&cx.held) = Some(Arc::new(stream));
            ProbeOutcome::ok("stream held open")
        })
    }

    fn backend_with_stream() -> MockMediaBackend {
        let mut backend = MockMediaBackend::new();
        backend
            .expect_open_stream()
            .returning(|_| Ok(AudioStream::channel(8, 16_000, 1).1));
        backend
    }

    #[test]
    fn test_default_table_order() {
        let strategies = default_strategies();
        let ids: Vec<u8> = strategies.iter().map(Strategy::id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(strategies[0].description(), "permission pre-check");
        assert_eq!(strategies[3].description(), "persistent hold");
    }

    #[tokio::test]
    async fn test_initial_statuses_pending() {
        let negotiator = Negotiator::new(Arc::new(MockMediaBackend::new()));
        for (_, status) in negotiator.statuses() {
            assert_eq!(status.state, StrategyState::Pending);
            assert!(status.message.is_empty());
        }
        assert!(!negotiator.all_failed());
    }

    #[tokio::test]
    async fn test_probe_unknown_id() {
        let mut negotiator =
            Negotiator::with_strategies(Arc::new(MockMediaBackend::new()), vec![]);
        let outcome = negotiator.probe(9).await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("unknown strategy"));
    }

    #[tokio::test]
    async fn test_probe_updates_status_and_log() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut negotiator = Negotiator::with_strategies(
            Arc::new(MockMediaBackend::new()),
            vec![ok_strategy(1, &calls)],
        );

        let outcome = negotiator.probe(1).await;
        assert!(outcome.success);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let status = negotiator.status(1).unwrap();
        assert_eq!(status.state, StrategyState::Success);
        assert_eq!(status.message, "scripted success");

        let logs: Vec<&String> = negotiator.logs().iter().collect();
        assert!(logs.iter().any(|l| l.contains("[strategy 1] testing")));
        assert!(logs.iter().any(|l| l.contains("[strategy 1] success")));
    }

    #[tokio::test]
    async fn test_probe_all_resets_then_leaves_terminal_states() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut negotiator = Negotiator::with_strategies(
            Arc::new(MockMediaBackend::new()),
            vec![
                ok_strategy(1, &calls),
                fail_strategy(2, &calls),
                ok_strategy(3, &calls),
            ],
        );

        // Dirty one status first so the reset is observable
        negotiator.probe(2).await;
        assert_eq!(
            negotiator.status(2).unwrap().state,
            StrategyState::Failed
        );

        let results = negotiator.probe_all().await;
        assert_eq!(results.get(&1), Some(&true));
        assert_eq!(results.get(&2), Some(&false));
        assert_eq!(results.get(&3), Some(&true));

        for (_, status) in negotiator.statuses() {
            assert!(matches!(
                status.state,
                StrategyState::Success | StrategyState::Failed
            ));
        }
        assert!(negotiator
            .logs()
            .iter()
            .any(|l| l.contains("working strategies: 1, 3")));
    }

    #[tokio::test]
    async fn test_probe_all_summary_when_everything_fails() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut negotiator = Negotiator::with_strategies(
            Arc::new(MockMediaBackend::new()),
            vec![fail_strategy(1, &calls), fail_strategy(2, &calls)],
        );

        let results = negotiator.probe_all().await;
        assert!(results.values().all(|ok| !ok));
        assert!(negotiator.all_failed());
        assert!(negotiator
            .logs()
            .iter()
            .any(|l| l.contains("all strategies failed")));
    }

    #[tokio::test]
    async fn test_acquire_first_success_wins() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut negotiator = Negotiator::with_strategies(
            Arc::new(backend_with_stream()),
            vec![
                fail_strategy(1, &calls),
                fail_strategy(2, &calls),
                ok_strategy(3, &calls),
                ok_strategy(4, &calls),
            ],
        );

        let stream = negotiator.acquire().await;
        assert!(stream.is_some());
        // Strategy 4 never ran
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(negotiator.status(1).unwrap().state, StrategyState::Failed);
        assert_eq!(negotiator.status(2).unwrap().state, StrategyState::Failed);
        assert_eq!(negotiator.status(3).unwrap().state, StrategyState::Success);
        assert_eq!(negotiator.status(4).unwrap().state, StrategyState::Pending);
    }

    #[tokio::test]
    async fn test_acquire_exhaustion_returns_none() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut negotiator = Negotiator::with_strategies(
            Arc::new(MockMediaBackend::new()),
            vec![
                fail_strategy(1, &calls),
                fail_strategy(2, &calls),
                fail_strategy(3, &calls),
                fail_strategy(4, &calls),
            ],
        );

        let stream = negotiator.acquire().await;
        assert!(stream.is_none());
        assert!(negotiator.all_failed());
        assert!(negotiator
            .logs()
            .iter()
            .any(|l| l.contains("all strategies failed to acquire microphone")));
    }

    #[tokio::test]
    async fn test_acquire_reuses_held_stream_without_probing() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut negotiator = Negotiator::with_strategies(
            Arc::new(MockMediaBackend::new()),
            vec![hold_strategy(1), fail_strategy(2, &calls)],
        );

        // First acquire parks and returns the held stream
        let first = negotiator.acquire().await.unwrap();
        assert!(first.is_active());

        // Second acquire must take the fast path: no probe runs at all
        let probes_before = calls.load(Ordering::SeqCst);
        let second = negotiator.acquire().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), probes_before);
        assert!(negotiator
            .logs()
            .iter()
            .any(|l| l.contains("reusing held persistent stream")));
    }

    #[tokio::test]
    async fn test_acquire_ignores_dead_held_stream() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut negotiator = Negotiator::with_strategies(
            Arc::new(MockMediaBackend::new()),
            vec![hold_strategy(1), fail_strategy(2, &calls)],
        );

        let first = negotiator.acquire().await.unwrap();
        first.close();

        // Held stream is inactive; strategies must run again
        let second = negotiator.acquire().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(second.is_active());
    }

    #[tokio::test]
    async fn test_release_held_closes_stream() {
        let mut negotiator = Negotiator::with_strategies(
            Arc::new(MockMediaBackend::new()),
            vec![hold_strategy(1)],
        );

        let stream = negotiator.acquire().await.unwrap();
        assert!(stream.is_active());
        negotiator.release_held();
        assert!(!stream.is_active());
    }

    #[tokio::test]
    async fn test_persistent_hold_releases_previous_stream() {
        let mut negotiator = Negotiator::with_strategies(
            Arc::new(backend_with_stream()),
            default_strategies()
                .into_iter()
                .filter(|s| s.id() == 4)
                .collect(),
        );

        assert!(negotiator.probe(4).await.success);
        let first = negotiator.active_held().unwrap();

        assert!(negotiator.probe(4).await.success);
        let second = negotiator.active_held().unwrap();

        assert!(!first.is_active());
        assert!(second.is_active());
    }

    #[tokio::test]
    async fn test_permission_precheck_granted_short_circuits() {
        let mut backend = MockMediaBackend::new();
        backend
            .expect_query_permission()
            .returning(|| Ok(PermissionState::Granted));
        // No open_stream expectation: a call would panic the mock

        let mut negotiator = Negotiator::with_strategies(
            Arc::new(backend),
            default_strategies().into_iter().take(1).collect(),
        );

        let outcome = negotiator.probe(1).await;
        assert!(outcome.success);
        assert!(outcome.message.contains("already granted"));
    }

    #[tokio::test]
    async fn test_permission_precheck_denied_fails_fast() {
        let mut backend = MockMediaBackend::new();
        backend
            .expect_query_permission()
            .returning(|| Ok(PermissionState::Denied));

        let mut negotiator = Negotiator::with_strategies(
            Arc::new(backend),
            default_strategies().into_iter().take(1).collect(),
        );

        let outcome = negotiator.probe(1).await;
        assert!(!outcome.success);
        assert_eq!(negotiator.status(1).unwrap().state, StrategyState::Failed);
    }

    #[tokio::test]
    async fn test_permission_precheck_prompt_falls_through_to_request() {
        let mut backend = MockMediaBackend::new();
        backend
            .expect_query_permission()
            .returning(|| Ok(PermissionState::Prompt));
        backend
            .expect_open_stream()
            .times(1)
            .returning(|_| Ok(AudioStream::channel(8, 16_000, 1).1));

        let mut negotiator = Negotiator::with_strategies(
            Arc::new(backend),
            default_strategies().into_iter().take(1).collect(),
        );

        assert!(negotiator.probe(1).await.success);
    }

    #[tokio::test]
    async fn test_warmup_fails_without_devices() {
        let mut backend = MockMediaBackend::new();
        backend.expect_enumerate_inputs().returning(|| Ok(vec![]));

        let mut negotiator = Negotiator::with_strategies(
            Arc::new(backend),
            default_strategies()
                .into_iter()
                .filter(|s| s.id() == 2)
                .collect(),
        );

        let outcome = negotiator.probe(2).await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("no audio inputs"));
    }

    #[tokio::test]
    async fn test_warmup_reports_device_count() {
        let mut backend = MockMediaBackend::new();
        backend.expect_enumerate_inputs().returning(|| {
            Ok(vec![
                InputDevice {
                    name: "Built-in Microphone".to_owned(),
                },
                InputDevice {
                    name: "USB Interface".to_owned(),
                },
            ])
        });
        backend
            .expect_open_stream()
            .returning(|_| Ok(AudioStream::channel(8, 16_000, 1).1));

        let mut negotiator = Negotiator::with_strategies(
            Arc::new(backend),
            default_strategies()
                .into_iter()
                .filter(|s| s.id() == 2)
                .collect(),
        );

        let outcome = negotiator.probe(2).await;
        assert!(outcome.success);
        assert!(outcome.message.contains("2 devices"));
    }

    #[tokio::test]
    async fn test_constrained_probe_passes_voice_constraints() {
        let mut backend = MockMediaBackend::new();
        backend
            .expect_open_stream()
            .withf(|c| c.echo_cancellation && c.sample_rate == Some(16_000))
            .returning(|_| Ok(AudioStream::channel(8, 16_000, 1).1));

        let mut negotiator = Negotiator::with_strategies(
            Arc::new(backend),
            default_strategies()
                .into_iter()
                .filter(|s| s.id() == 3)
                .collect(),
        );

        assert!(negotiator.probe(3).await.success);
    }

    #[tokio::test]
    async fn test_probe_captures_backend_error_as_message() {
        let mut backend = MockMediaBackend::new();
        backend
            .expect_open_stream()
            .returning(|_| Err(MediaError::NoDevice));

        let mut negotiator = Negotiator::with_strategies(
            Arc::new(backend),
            default_strategies()
                .into_iter()
                .filter(|s| s.id() == 3)
                .collect(),
        );

        let outcome = negotiator.probe(3).await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("no audio input device"));
    }

    #[tokio::test]
    async fn test_log_ring_is_capped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut negotiator = Negotiator::with_strategies(
            Arc::new(MockMediaBackend::new()),
            vec![fail_strategy(1, &calls)],
        );

        for _ in 0..60 {
            negotiator.probe(1).await;
        }
        assert!(negotiator.logs().len() <= 50);
    }
}
