//! Mock timer backend for testing
//!
//! Records every scheduled timer and keeps a virtual clock. Tasks only run
//! when the test advances the clock past their deadline and awaits them.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::TelemetryResult;
use crate::timing::{TimerBackend, TimerTask};

/// Recorded timer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedTimer {
    /// Timer ID
    pub id: String,
    /// Delay from the moment it was scheduled
    pub delay: Duration,
    /// Virtual time at which it fires
    pub deadline: Duration,
    /// Whether this timer was cancelled
    pub cancelled: bool,
    /// Whether this timer has fired
    pub fired: bool,
}

impl RecordedTimer {
    fn is_pending(&self) -> bool {
        !self.cancelled && !self.fired
    }
}

#[derive(Default)]
struct MockState {
    now: Duration,
    timers: HashMap<String, RecordedTimer>,
    tasks: HashMap<String, TimerTask>,
}

/// Mock timer backend driven by a virtual clock
pub struct MockTimerBackend {
    state: Mutex<MockState>,
}

impl MockTimerBackend {
    /// Create a new mock backend
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
        }
    }

    /// Get a recorded timer
    pub fn get_timer(&self, id: &str) -> Option<RecordedTimer> {
        self.state.lock().timers.get(id).cloned()
    }

    /// Get all recorded timers
    pub fn all_timers(&self) -> Vec<RecordedTimer> {
        self.state.lock().timers.values().cloned().collect()
    }

    /// Count of timers ever scheduled
    pub fn count(&self) -> usize {
        self.state.lock().timers.len()
    }

    /// Count of pending timers
    pub fn active_count(&self) -> usize {
        self.state
            .lock()
            .timers
            .values()
            .filter(|t| t.is_pending())
            .count()
    }

    /// Current virtual time
    pub fn now(&self) -> Duration {
        self.state.lock().now
    }

    /// Move the virtual clock forward and hand back every task now due
    ///
    /// The caller awaits the returned tasks; they are marked fired either way.
    pub fn advance(&self, by: Duration) -> Vec<TimerTask> {
        let mut state = self.state.lock();
        state.now += by;
        let now = state.now;

        let mut due: Vec<(Duration, String)> = state
            .timers
            .values()
            .filter(|t| t.is_pending() && t.deadline <= now)
            .map(|t| (t.deadline, t.id.clone()))
            .collect();
        due.sort();

        let mut tasks = Vec::with_capacity(due.len());
        for (_, id) in due {
            if let Some(timer) = state.timers.get_mut(&id) {
                timer.fired = true;
            }
            if let Some(task) = state.tasks.remove(&id) {
                tasks.push(task);
            }
        }
        tasks
    }
}

impl Default for MockTimerBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerBackend for MockTimerBackend {
    fn schedule_once(&self, id: &str, delay: Duration, task: TimerTask) -> TelemetryResult<()> {
        let mut state = self.state.lock();
        let deadline = state.now + delay;
        state.timers.insert(
            id.to_string(),
            RecordedTimer {
                id: id.to_string(),
                delay,
                deadline,
                cancelled: false,
                fired: false,
            },
        );
        state.tasks.insert(id.to_string(), task);
        Ok(())
    }

    fn cancel(&self, id: &str) -> TelemetryResult<bool> {
        let mut state = self.state.lock();
        let was_pending = match state.timers.get_mut(id) {
            Some(timer) if timer.is_pending() => {
                timer.cancelled = true;
                true
            }
            _ => false,
        };
        state.tasks.remove(id);
        Ok(was_pending)
    }

    fn exists(&self, id: &str) -> bool {
        self.state
            .lock()
            .timers
            .get(id)
            .map(|t| t.is_pending())
            .unwrap_or(false)
    }

    fn time_remaining(&self, id: &str) -> Option<Duration> {
        let state = self.state.lock();
        state
            .timers
            .get(id)
            .filter(|t| t.is_pending())
            .map(|t| t.deadline.saturating_sub(state.now))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
