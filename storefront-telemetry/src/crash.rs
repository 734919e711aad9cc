//! Crash simulation scheduler
//!
//! In CI mode each session rolls once at startup. A roll above the
//! threshold arms a one-shot timer that, after a random delay, reports the
//! upcoming fault, waits for telemetry to flush and then hands control to a
//! [`FaultInjector`], which by default aborts the process.
//!
//! ```text
//!            ci_mode = false
//!   Idle ───────────────────────▶ Idle (forever)
//!     │
//!     │ evaluate: roll in [0, 100)
//!     ├── roll >  threshold ──▶ Armed { delay_ms } ──timer──▶ fault
//!     └── roll <= threshold ──▶ Disarmed
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::CrashConfig;
use crate::events::{EventEmitter, LogProperties, Severity};
use crate::properties::SessionPropertyStore;
use crate::timing::TimerBackend;

/// Timer id of the scheduled crash
pub const CRASH_TIMER_ID: &str = "crash:scheduled";

/// Session property recording the roll outcome
pub const PROP_CRASH_SCHEDULED: &str = "ci_crash_scheduled";

/// Session property set when a crash is armed
pub const PROP_CI_MODE: &str = "ci_mode";

/// Source of randomness for the crash decision
pub trait RandomSource: Send + Sync {
    /// Uniform integer in `[0, 100)`
    fn roll_percent(&self) -> u32;

    /// Uniform integer in `[min_ms, max_ms)`
    fn delay_between(&self, min_ms: u64, max_ms: u64) -> u64;
}

/// Thread-local RNG
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn roll_percent(&self) -> u32 {
        rand::thread_rng().gen_range(0..100)
    }

    fn delay_between(&self, min_ms: u64, max_ms: u64) -> u64 {
        rand::thread_rng().gen_range(min_ms..max_ms)
    }
}

/// Seeded RNG for reproducible runs
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn roll_percent(&self) -> u32 {
        self.rng.lock().gen_range(0..100)
    }

    fn delay_between(&self, min_ms: u64, max_ms: u64) -> u64 {
        self.rng.lock().gen_range(min_ms..max_ms)
    }
}

/// Fixed answers for tests
#[derive(Debug, Clone, Copy)]
pub struct FixedRandom {
    roll: u32,
    delay_ms: Option<u64>,
}

impl FixedRandom {
    /// Always roll `roll`; delays default to the range minimum
    pub fn new(roll: u32) -> Self {
        Self { roll, delay_ms: None }
    }

    /// Delay to return, clamped into the requested range
    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = Some(delay_ms);
        self
    }
}

impl RandomSource for FixedRandom {
    fn roll_percent(&self) -> u32 {
        self.roll
    }

    fn delay_between(&self, min_ms: u64, max_ms: u64) -> u64 {
        match self.delay_ms {
            Some(delay) => delay.clamp(min_ms, max_ms.saturating_sub(1).max(min_ms)),
            None => min_ms,
        }
    }
}

/// Where an injected fault came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultOrigin {
    /// `trigger_test_crash`
    Manual,
    /// CI-mode timer
    Scheduled,
}

/// A deliberately injected fault
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectedFault {
    pub origin: FaultOrigin,
    pub reason: String,
}

/// Receives the injected fault. Production implementations do not return.
pub trait FaultInjector: Send + Sync {
    fn inject(&self, fault: &InjectedFault);
}

/// Aborts the process
#[derive(Debug, Default, Clone, Copy)]
pub struct AbortFaultInjector;

impl FaultInjector for AbortFaultInjector {
    fn inject(&self, fault: &InjectedFault) {
        tracing::error!(origin = ?fault.origin, reason = %fault.reason, "Injecting fault, aborting process");
        std::process::abort();
    }
}

/// Records faults instead of acting on them
#[derive(Debug, Default, Clone)]
pub struct RecordingFaultInjector {
    faults: Arc<Mutex<Vec<InjectedFault>>>,
}

impl RecordingFaultInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn faults(&self) -> Vec<InjectedFault> {
        self.faults.lock().clone()
    }
}

impl FaultInjector for RecordingFaultInjector {
    fn inject(&self, fault: &InjectedFault) {
        self.faults.lock().push(fault.clone());
    }
}

/// Scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum CrashState {
    /// CI mode off, or not evaluated yet
    Idle,
    /// Crash timer pending
    Armed { delay_ms: u64 },
    /// Rolled not to crash this session
    Disarmed,
}

/// One-shot, probability-gated crash scheduler
pub struct CrashScheduler {
    config: CrashConfig,
    ci_mode: bool,
    random: Arc<dyn RandomSource>,
    timers: Arc<dyn TimerBackend>,
    faults: Arc<dyn FaultInjector>,
    state: Mutex<CrashState>,
    evaluated: AtomicBool,
}

impl CrashScheduler {
    pub(crate) fn new(
        config: CrashConfig,
        ci_mode: bool,
        random: Arc<dyn RandomSource>,
        timers: Arc<dyn TimerBackend>,
        faults: Arc<dyn FaultInjector>,
    ) -> Self {
        Self {
            config,
            ci_mode,
            random,
            timers,
            faults,
            state: Mutex::new(CrashState::Idle),
            evaluated: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> CrashState {
        *self.state.lock()
    }

    /// Roll once and arm or disarm
    ///
    /// Later calls return the first outcome without rolling again.
    pub(crate) async fn evaluate(
        &self,
        properties: &SessionPropertyStore,
        events: Arc<EventEmitter>,
    ) -> CrashState {
        if !self.ci_mode {
            return CrashState::Idle;
        }
        if self.evaluated.swap(true, Ordering::SeqCst) {
            return self.state();
        }

        let roll = self.random.roll_percent();
        if roll <= self.config.threshold {
            tracing::info!(roll, threshold = self.config.threshold, "CI crash not scheduled");
            return self.disarm(properties).await;
        }

        let delay_ms = self
            .random
            .delay_between(self.config.min_delay_ms, self.config.max_delay_ms);

        let task = fault_task(
            events,
            self.faults.clone(),
            delay_ms,
            Duration::from_millis(self.config.flush_grace_ms),
        );

        // Properties follow the timer outcome, not the roll
        if let Err(e) = self
            .timers
            .schedule_once(CRASH_TIMER_ID, Duration::from_millis(delay_ms), task)
        {
            tracing::warn!(roll, error = %e, "Failed to schedule CI crash");
            return self.disarm(properties).await;
        }

        let state = CrashState::Armed { delay_ms };
        *self.state.lock() = state;
        properties.set(PROP_CRASH_SCHEDULED, "true", false).await;
        properties.set(PROP_CI_MODE, "enabled", false).await;
        tracing::info!(roll, delay_ms, timer = self.timers.name(), "CI crash scheduled");
        state
    }

    async fn disarm(&self, properties: &SessionPropertyStore) -> CrashState {
        *self.state.lock() = CrashState::Disarmed;
        properties.set(PROP_CRASH_SCHEDULED, "false", false).await;
        CrashState::Disarmed
    }

    /// Report and inject a fault right away
    pub(crate) async fn trigger_now(&self, events: &EventEmitter, reason: &str) {
        events.breadcrumb(&format!("Test crash triggered: {}", reason)).await;

        let mut properties = LogProperties::new();
        properties.insert("crash_type".to_string(), "manual".to_string());
        events
            .log(Severity::Error, &format!("Manual test crash: {}", reason), Some(properties))
            .await;

        self.faults.inject(&InjectedFault {
            origin: FaultOrigin::Manual,
            reason: reason.to_string(),
        });
    }
}

fn fault_task(
    events: Arc<EventEmitter>,
    faults: Arc<dyn FaultInjector>,
    delay_ms: u64,
    grace: Duration,
) -> crate::timing::TimerTask {
    Box::pin(async move {
        let reason = format!("CI scheduled crash after {}ms", delay_ms);

        events.breadcrumb("CI mode: triggering scheduled crash").await;

        let mut properties = LogProperties::new();
        properties.insert("crash_type".to_string(), "ci_scheduled".to_string());
        properties.insert("delay_ms".to_string(), delay_ms.to_string());
        events.log(Severity::Error, &reason, Some(properties)).await;

        tokio::time::sleep(grace).await;

        faults.inject(&InjectedFault {
            origin: FaultOrigin::Scheduled,
            reason,
        });
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::session::Session;
    use crate::timing::MockTimerBackend;

    struct Fixture {
        backend: MemoryBackend,
        timers: Arc<MockTimerBackend>,
        faults: RecordingFaultInjector,
        properties: SessionPropertyStore,
        events: Arc<EventEmitter>,
    }

    fn fixture() -> Fixture {
        let backend = MemoryBackend::new();
        let session = Arc::new(Session::initialized());
        Fixture {
            timers: Arc::new(MockTimerBackend::new()),
            faults: RecordingFaultInjector::new(),
            properties: SessionPropertyStore::new(Arc::new(backend.clone()), session.clone()),
            events: Arc::new(EventEmitter::new(Arc::new(backend.clone()), session)),
            backend,
        }
    }

    fn scheduler(f: &Fixture, ci_mode: bool, random: impl RandomSource + 'static) -> CrashScheduler {
        CrashScheduler::new(
            CrashConfig::default(),
            ci_mode,
            Arc::new(random),
            f.timers.clone(),
            Arc::new(f.faults.clone()),
        )
    }

    #[tokio::test]
    async fn test_high_rolls_arm() {
        for roll in 80..100 {
            let f = fixture();
            let scheduler = scheduler(&f, true, FixedRandom::new(roll).with_delay(27_000));

            let state = scheduler.evaluate(&f.properties, f.events.clone()).await;

            assert_eq!(state, CrashState::Armed { delay_ms: 27_000 });
            assert_eq!(f.timers.count(), 1);
            assert_eq!(
                f.timers.get_timer(CRASH_TIMER_ID).unwrap().delay,
                Duration::from_millis(27_000)
            );
            assert_eq!(f.backend.property(PROP_CRASH_SCHEDULED).unwrap().value, "true");
            assert_eq!(f.backend.property(PROP_CI_MODE).unwrap().value, "enabled");
        }
    }

    #[tokio::test]
    async fn test_low_rolls_disarm() {
        for roll in 0..80 {
            let f = fixture();
            let scheduler = scheduler(&f, true, FixedRandom::new(roll));

            let state = scheduler.evaluate(&f.properties, f.events.clone()).await;

            assert_eq!(state, CrashState::Disarmed);
            assert_eq!(f.timers.count(), 0);
            assert_eq!(f.backend.property(PROP_CRASH_SCHEDULED).unwrap().value, "false");
            assert!(f.backend.property(PROP_CI_MODE).is_none());
        }
    }

    #[tokio::test]
    async fn test_ci_mode_off_stays_idle() {
        let f = fixture();
        let scheduler = scheduler(&f, false, FixedRandom::new(99));

        let state = scheduler.evaluate(&f.properties, f.events.clone()).await;

        assert_eq!(state, CrashState::Idle);
        assert_eq!(scheduler.state(), CrashState::Idle);
        assert_eq!(f.timers.count(), 0);
        assert!(f.backend.properties().is_empty());
    }

    #[tokio::test]
    async fn test_evaluates_once() {
        let f = fixture();
        let scheduler = scheduler(&f, true, FixedRandom::new(95));

        let first = scheduler.evaluate(&f.properties, f.events.clone()).await;
        let second = scheduler.evaluate(&f.properties, f.events.clone()).await;

        assert_eq!(first, second);
        assert_eq!(f.timers.count(), 1);
    }

    #[tokio::test]
    async fn test_seeded_delays_within_bounds() {
        let config = CrashConfig::default();
        let random = SeededRandom::new(42);

        for _ in 0..1000 {
            let delay = random.delay_between(config.min_delay_ms, config.max_delay_ms);
            assert!((20_000..35_000).contains(&delay));
            assert!(random.roll_percent() < 100);
        }
    }

    #[test]
    fn test_fixed_delay_clamped() {
        assert_eq!(FixedRandom::new(90).delay_between(20_000, 35_000), 20_000);
        assert_eq!(FixedRandom::new(90).with_delay(1).delay_between(20_000, 35_000), 20_000);
        assert_eq!(
            FixedRandom::new(90).with_delay(99_999).delay_between(20_000, 35_000),
            34_999
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fired_timer_reports_then_injects() {
        let f = fixture();
        let scheduler = scheduler(&f, true, FixedRandom::new(90).with_delay(30_000));
        scheduler.evaluate(&f.properties, f.events.clone()).await;

        assert!(f.timers.advance(Duration::from_millis(29_999)).is_empty());

        let due = f.timers.advance(Duration::from_millis(1));
        assert_eq!(due.len(), 1);
        for task in due {
            task.await;
        }

        assert!(f
            .backend
            .breadcrumbs()
            .contains(&"CI mode: triggering scheduled crash".to_string()));
        let logs = f.backend.logs();
        let last = logs.last().unwrap();
        assert_eq!(last.severity, Severity::Error);
        assert_eq!(last.properties.get("crash_type").map(String::as_str), Some("ci_scheduled"));

        let faults = f.faults.faults();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].origin, FaultOrigin::Scheduled);
    }

    #[tokio::test]
    async fn test_trigger_now() {
        let f = fixture();
        let scheduler = scheduler(&f, false, FixedRandom::new(0));

        scheduler.trigger_now(&f.events, "button pressed").await;

        let faults = f.faults.faults();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].origin, FaultOrigin::Manual);
        assert_eq!(faults[0].reason, "button pressed");
        assert_eq!(f.backend.logs().len(), 1);
    }
}
