// ── Adaptive poller ──
//
// Independent per-URI polling tasks. Each task is an explicit state
// machine over {Stopped, Waiting, FixedInterval}:
//
//   Stopped        --start-->            Waiting (configured interval)
//   Waiting        --window in band-->   FixedInterval
//   FixedInterval  --window off band-->  Waiting (max(avg, interval))
//   any            --change_interval-->  Waiting (new interval)
//   any            --stop / circuit-->   Stopped
//
// Waiting fires one interval after the previous fetch completed, so its
// cycle is latency plus interval. FixedInterval fires on its timer
// regardless of latency. The rolling window holds the last five gaps
// between successful completions and is cleared on every mode or pace
// change. Manual runs stay outside all of this.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ffwatch_api::ApiClient;
use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use futures_util::stream::FuturesUnordered;
use serde_json::Value;
use strum::Display;
use tokio::sync::{Notify, broadcast};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

const WINDOW: usize = 5;
const FAILURE_HISTORY: usize = 10;
const CIRCUIT_THRESHOLD: usize = 3;
const EVENT_CHANNEL_SIZE: usize = 64;
const BAND: f64 = 0.1;

// ── Fetching ─────────────────────────────────────────────────────────

/// Source of poll payloads. `uri` is relative to the API base.
pub trait Fetch: Send + Sync {
    fn fetch<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, Result<Value, ffwatch_api::Error>>;
}

impl Fetch for ApiClient {
    fn fetch<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, Result<Value, ffwatch_api::Error>> {
        Box::pin(self.get(uri))
    }
}

/// Receives each successful payload.
pub type PollCallback = Arc<dyn Fn(Value) + Send + Sync>;

// ── Public types ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PollMode {
    Stopped,
    Waiting,
    FixedInterval,
}

/// Point-in-time view of one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub uri: String,
    pub mode: PollMode,
    /// Interval given to `add` / `change_interval`.
    pub interval: Duration,
    /// Observed cycle in waiting mode, the interval in fixed mode.
    pub effective_interval: Duration,
    pub fired: u64,
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollerEvent {
    ModeChanged {
        uri: String,
        mode: PollMode,
        interval: Duration,
    },
    /// A task stopped for good after repeated failures. Re-`add` to resume.
    CircuitOpen { uri: String, failures: usize },
}

/// Pick mode and pace for an observed average gap.
///
/// An average within ±10% of the configured interval settles on a fixed
/// rate; anything else paces itself at the larger of the two.
pub fn adapt(configured: Duration, average: Duration) -> (PollMode, Duration) {
    let lower = configured.mul_f64(1.0 - BAND);
    let upper = configured.mul_f64(1.0 + BAND);
    if (lower..=upper).contains(&average) {
        (PollMode::FixedInterval, configured)
    } else {
        (PollMode::Waiting, average.max(configured))
    }
}

// ── Task internals ───────────────────────────────────────────────────

/// Delivery gate. Results are delivered under the read lock; `stop`
/// takes the write lock, so once it returns no callback is running or
/// will run for an earlier generation.
#[derive(Default)]
struct Gate {
    generation: u64,
    active: bool,
    removed: bool,
}

struct Schedule {
    mode: PollMode,
    interval: Duration,
    effective: Duration,
    fired: u64,
    gaps: VecDeque<Duration>,
    last_success: Option<Instant>,
    /// Fire ids of failed fetches, ascending.
    failures: Vec<u64>,
    consecutive_failures: u32,
    runner: Option<CancellationToken>,
}

struct PollTask {
    uri: String,
    callback: PollCallback,
    gate: RwLock<Gate>,
    schedule: Mutex<Schedule>,
    reschedule: Notify,
}

enum Change {
    Mode(PollMode, Duration),
    CircuitOpen(usize),
}

impl PollTask {
    fn new(uri: String, callback: PollCallback, interval: Duration) -> Self {
        Self {
            uri,
            callback,
            gate: RwLock::new(Gate::default()),
            schedule: Mutex::new(Schedule {
                mode: PollMode::Stopped,
                interval,
                effective: interval,
                fired: 0,
                gaps: VecDeque::with_capacity(WINDOW),
                last_success: None,
                failures: Vec::new(),
                consecutive_failures: 0,
                runner: None,
            }),
            reschedule: Notify::new(),
        }
    }

    fn schedule(&self) -> std::sync::MutexGuard<'_, Schedule> {
        self.schedule.lock().expect("poll schedule lock poisoned")
    }

    fn generation(&self) -> u64 {
        self.gate.read().expect("poll gate lock poisoned").generation
    }

    fn info(&self) -> TaskInfo {
        let s = self.schedule();
        TaskInfo {
            uri: self.uri.clone(),
            mode: s.mode,
            interval: s.interval,
            effective_interval: s.effective,
            fired: s.fired,
            consecutive_failures: s.consecutive_failures,
        }
    }

    /// Activate under a new generation. `None` if already running or removed.
    fn activate(&self, token: CancellationToken) -> Option<u64> {
        let generation = {
            let mut gate = self.gate.write().expect("poll gate lock poisoned");
            if gate.active || gate.removed {
                return None;
            }
            gate.generation += 1;
            gate.active = true;
            gate.generation
        };
        let mut s = self.schedule();
        s.mode = PollMode::Waiting;
        s.effective = s.interval;
        s.gaps.clear();
        s.last_success = None;
        s.failures.clear();
        s.consecutive_failures = 0;
        s.runner = Some(token);
        Some(generation)
    }

    /// Deactivate; results of earlier fires are dropped from here on.
    fn halt(&self, removed: bool) -> bool {
        let was_active = {
            let mut gate = self.gate.write().expect("poll gate lock poisoned");
            let was_active = gate.active;
            gate.generation += 1;
            gate.active = false;
            gate.removed |= removed;
            was_active
        };
        let mut s = self.schedule();
        s.mode = PollMode::Stopped;
        if let Some(runner) = s.runner.take() {
            runner.cancel();
        }
        was_active
    }

    fn next_fire_id(&self) -> u64 {
        let mut s = self.schedule();
        s.fired += 1;
        s.fired
    }

    fn record_success(&self, now: Instant) -> Option<Change> {
        let mut s = self.schedule();
        s.consecutive_failures = 0;
        if s.mode == PollMode::Stopped {
            return None;
        }
        if let Some(last) = s.last_success.replace(now) {
            s.gaps.push_back(now.duration_since(last));
            if s.gaps.len() > WINDOW {
                s.gaps.pop_front();
            }
        }
        if s.gaps.len() < WINDOW {
            return None;
        }

        let total: Duration = s.gaps.iter().sum();
        let average = total / WINDOW as u32;
        let (mode, pace) = adapt(s.interval, average);
        if mode == s.mode && pace == s.effective {
            return None;
        }
        trace!(uri = %self.uri, ?average, %mode, ?pace, "adapting poll pace");
        s.mode = mode;
        s.effective = pace;
        s.gaps.clear();
        Some(Change::Mode(mode, pace))
    }

    fn record_failure(&self, fire: u64) -> Option<Change> {
        let mut s = self.schedule();
        s.consecutive_failures += 1;
        let at = s.failures.partition_point(|&f| f < fire);
        s.failures.insert(at, fire);
        if s.failures.len() > FAILURE_HISTORY {
            s.failures.remove(0);
        }

        let recent = &s.failures[s.failures.len().saturating_sub(CIRCUIT_THRESHOLD)..];
        let tripped = recent.len() == CIRCUIT_THRESHOLD && recent.windows(2).all(|w| w[1] == w[0] + 1);
        tripped.then_some(Change::CircuitOpen(CIRCUIT_THRESHOLD))
    }

    /// Result of a manual run: delivered, but never counted.
    fn complete_run(&self, generation: u64, result: Result<Value, ffwatch_api::Error>) {
        match result {
            Ok(value) => self.deliver(generation, value),
            Err(e) => debug!(uri = %self.uri, error = %e, "manual poll failed"),
        }
    }

    /// Hand a payload to the callback unless the fire is stale.
    fn deliver(&self, generation: u64, value: Value) {
        let gate = self.gate.read().expect("poll gate lock poisoned");
        if gate.removed || gate.generation != generation {
            debug!(uri = %self.uri, "dropping stale poll result");
            return;
        }
        (self.callback)(value);
    }

    fn complete(
        &self,
        poller: &Weak<PollerInner>,
        generation: u64,
        fire: u64,
        result: Result<Value, ffwatch_api::Error>,
    ) {
        if self.generation() != generation {
            debug!(uri = %self.uri, fire, "ignoring completion of a stopped task");
            return;
        }

        let change = match result {
            Ok(value) => {
                let change = self.record_success(Instant::now());
                self.deliver(generation, value);
                change
            }
            Err(e) => {
                debug!(uri = %self.uri, fire, error = %e, "poll failed");
                self.record_failure(fire)
            }
        };

        let Some(inner) = poller.upgrade() else {
            return;
        };
        match change {
            Some(Change::Mode(mode, interval)) => {
                self.reschedule.notify_one();
                inner.emit(PollerEvent::ModeChanged {
                    uri: self.uri.clone(),
                    mode,
                    interval,
                });
            }
            Some(Change::CircuitOpen(failures)) => {
                warn!(uri = %self.uri, failures, "polling stopped after repeated failures");
                self.halt(true);
                inner
                    .tasks
                    .remove_if(&self.uri, |_, task| std::ptr::eq(task.as_ref(), self));
                inner.emit(PollerEvent::CircuitOpen {
                    uri: self.uri.clone(),
                    failures,
                });
            }
            None => {}
        }
    }
}

// ── Poller ───────────────────────────────────────────────────────────

/// Registry of polling tasks.
///
/// Cheaply cloneable. Tasks run on the current tokio runtime and stop
/// when the last clone is dropped.
///
/// Callbacks must not stop or remove their own task: `stop` waits for a
/// running callback to return.
#[derive(Clone)]
pub struct Poller {
    inner: Arc<PollerInner>,
}

struct PollerInner {
    fetcher: Arc<dyn Fetch>,
    default_interval: Duration,
    tasks: DashMap<String, Arc<PollTask>>,
    events: broadcast::Sender<PollerEvent>,
    cancel: CancellationToken,
}

impl PollerInner {
    fn emit(&self, event: PollerEvent) {
        let _ = self.events.send(event);
    }
}

impl Drop for PollerInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Poller {
    pub fn new(fetcher: Arc<dyn Fetch>, default_interval: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            inner: Arc::new(PollerInner {
                fetcher,
                default_interval,
                tasks: DashMap::new(),
                events,
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Register a task for `uri`. Returns `None` if one already exists.
    pub fn add<F>(
        &self,
        uri: &str,
        callback: F,
        auto_start: bool,
        interval: Option<Duration>,
    ) -> Option<TaskHandle>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let interval = interval.unwrap_or(self.inner.default_interval);
        let task = match self.inner.tasks.entry(uri.to_owned()) {
            Entry::Occupied(_) => {
                trace!(uri, "poll task already registered");
                return None;
            }
            Entry::Vacant(slot) => {
                let task = Arc::new(PollTask::new(uri.to_owned(), Arc::new(callback), interval));
                slot.insert(Arc::clone(&task));
                task
            }
        };
        debug!(uri, ?interval, auto_start, "poll task added");

        if auto_start {
            self.spawn_runner(task);
        }
        Some(TaskHandle {
            uri: uri.to_owned(),
            poller: self.clone(),
        })
    }

    /// Stop and delete the task for `uri`.
    pub fn remove(&self, uri: &str) -> bool {
        match self.inner.tasks.remove(uri) {
            Some((_, task)) => {
                task.halt(true);
                debug!(uri, "poll task removed");
                true
            }
            None => false,
        }
    }

    /// Start a stopped task. `false` if unknown or already running.
    pub fn start(&self, uri: &str) -> bool {
        self.task(uri).is_some_and(|task| self.spawn_runner(task))
    }

    /// Stop a running task. Pending timers are cancelled and results of
    /// fetches already in flight are dropped.
    pub fn stop(&self, uri: &str) -> bool {
        self.task(uri).is_some_and(|task| task.halt(false))
    }

    /// Fire once right now, whatever the mode, without touching the
    /// schedule.
    pub fn run(&self, uri: &str) -> bool {
        let Some(task) = self.task(uri) else {
            return false;
        };
        let generation = task.generation();
        let fetcher = Arc::clone(&self.inner.fetcher);
        tokio::spawn(async move {
            let result = fetcher.fetch(&task.uri).await;
            task.complete_run(generation, result);
        });
        true
    }

    /// Switch to self-paced waiting at `interval` and reschedule.
    pub fn change_interval(&self, uri: &str, interval: Duration) -> bool {
        let Some(task) = self.task(uri) else {
            return false;
        };
        let running = {
            let mut s = task.schedule();
            s.interval = interval;
            s.effective = interval;
            s.gaps.clear();
            if s.mode != PollMode::Stopped {
                s.mode = PollMode::Waiting;
            }
            s.mode != PollMode::Stopped
        };
        if running {
            task.reschedule.notify_one();
            self.inner.emit(PollerEvent::ModeChanged {
                uri: uri.to_owned(),
                mode: PollMode::Waiting,
                interval,
            });
        }
        true
    }

    pub fn get(&self, uri: &str) -> Option<TaskInfo> {
        self.task(uri).map(|task| task.info())
    }

    /// All tasks, ordered by uri.
    pub fn list(&self) -> Vec<TaskInfo> {
        let mut tasks: Vec<TaskInfo> = self.inner.tasks.iter().map(|r| r.value().info()).collect();
        tasks.sort_by(|a, b| a.uri.cmp(&b.uri));
        tasks
    }

    /// Handle over every registered task.
    pub fn get_all(&self) -> TaskSet {
        TaskSet {
            poller: self.clone(),
        }
    }

    pub fn events(&self) -> broadcast::Receiver<PollerEvent> {
        self.inner.events.subscribe()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn task(&self, uri: &str) -> Option<Arc<PollTask>> {
        self.inner.tasks.get(uri).map(|r| Arc::clone(r.value()))
    }

    fn uris(&self) -> Vec<String> {
        self.inner.tasks.iter().map(|r| r.key().clone()).collect()
    }

    fn spawn_runner(&self, task: Arc<PollTask>) -> bool {
        let token = self.inner.cancel.child_token();
        let Some(generation) = task.activate(token.clone()) else {
            return false;
        };
        debug!(uri = %task.uri, generation, "poll task started");
        tokio::spawn(run_task(
            task,
            Arc::downgrade(&self.inner),
            Arc::clone(&self.inner.fetcher),
            generation,
            token,
        ));
        true
    }
}

/// Handle to one task returned by [`Poller::add`].
#[derive(Clone)]
pub struct TaskHandle {
    uri: String,
    poller: Poller,
}

impl TaskHandle {
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn start(&self) -> bool {
        self.poller.start(&self.uri)
    }

    pub fn stop(&self) -> bool {
        self.poller.stop(&self.uri)
    }

    pub fn run(&self) -> bool {
        self.poller.run(&self.uri)
    }

    pub fn info(&self) -> Option<TaskInfo> {
        self.poller.get(&self.uri)
    }

    pub fn remove(self) -> bool {
        self.poller.remove(&self.uri)
    }
}

/// Bulk operations over every task registered at call time.
pub struct TaskSet {
    poller: Poller,
}

impl TaskSet {
    pub fn start(&self) {
        for uri in self.poller.uris() {
            self.poller.start(&uri);
        }
    }

    pub fn stop(&self) {
        for uri in self.poller.uris() {
            self.poller.stop(&uri);
        }
    }

    pub fn remove(self) {
        for uri in self.poller.uris() {
            self.poller.remove(&uri);
        }
    }
}

// ── Runner ───────────────────────────────────────────────────────────

type InFlight = BoxFuture<'static, (u64, Result<Value, ffwatch_api::Error>)>;

async fn run_task(
    task: Arc<PollTask>,
    poller: Weak<PollerInner>,
    fetcher: Arc<dyn Fetch>,
    generation: u64,
    cancel: CancellationToken,
) {
    let mut in_flight: FuturesUnordered<InFlight> = FuturesUnordered::new();
    let mut last_fired: Option<Instant> = None;
    let mut last_completed: Option<Instant> = None;

    loop {
        let (mode, interval) = {
            let s = task.schedule();
            (s.mode, s.interval)
        };
        let (can_fire, anchor) = match mode {
            PollMode::Waiting => (in_flight.is_empty(), last_completed),
            PollMode::FixedInterval => (true, last_fired),
            PollMode::Stopped => (false, None),
        };
        let next_fire = anchor.map_or_else(Instant::now, |at| at + interval);

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = task.reschedule.notified() => {}
            Some((fire, result)) = in_flight.next(), if !in_flight.is_empty() => {
                last_completed = Some(Instant::now());
                task.complete(&poller, generation, fire, result);
            }
            () = tokio::time::sleep_until(next_fire), if can_fire => {
                let fire = task.next_fire_id();
                last_fired = Some(Instant::now());
                trace!(uri = %task.uri, fire, %mode, "poll fire");
                let fetcher = Arc::clone(&fetcher);
                let uri = task.uri.clone();
                in_flight.push(Box::pin(async move {
                    let result = fetcher.fetch(&uri).await;
                    (fire, result)
                }));
            }
        }
    }
    trace!(uri = %task.uri, generation, "poll runner exited");
}
