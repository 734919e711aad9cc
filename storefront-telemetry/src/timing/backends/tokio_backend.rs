//! Tokio timer backend
//!
//! Spawns one task per timer on the current runtime. Under a paused tokio
//! clock (`start_paused = true`) tests can drive it with
//! `tokio::time::advance` instead of waiting.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{TelemetryError, TelemetryResult};
use crate::timing::{TimerBackend, TimerTask};

struct TimerState {
    handle: JoinHandle<()>,
    deadline: Instant,
}

/// Timer backend built on `tokio::time::sleep`
pub struct TokioTimerBackend {
    timers: Mutex<HashMap<String, TimerState>>,
}

impl TokioTimerBackend {
    pub fn new() -> Self {
        Self {
            timers: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for TokioTimerBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerBackend for TokioTimerBackend {
    fn schedule_once(&self, id: &str, delay: Duration, task: TimerTask) -> TelemetryResult<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TelemetryError::Timer(format!("no tokio runtime: {}", e)))?;

        let deadline = Instant::now() + delay;
        let handle = runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            task.await;
        });

        let previous = self
            .timers
            .lock()
            .insert(id.to_string(), TimerState { handle, deadline });
        if let Some(previous) = previous {
            previous.handle.abort();
        }

        Ok(())
    }

    fn cancel(&self, id: &str) -> TelemetryResult<bool> {
        match self.timers.lock().remove(id) {
            Some(state) => {
                let pending = !state.handle.is_finished();
                state.handle.abort();
                Ok(pending)
            }
            None => Ok(false),
        }
    }

    fn exists(&self, id: &str) -> bool {
        self.timers
            .lock()
            .get(id)
            .map(|s| !s.handle.is_finished())
            .unwrap_or(false)
    }

    fn time_remaining(&self, id: &str) -> Option<Duration> {
        self.timers
            .lock()
            .get(id)
            .filter(|s| !s.handle.is_finished())
            .map(|s| s.deadline.saturating_duration_since(Instant::now()))
    }

    fn name(&self) -> &'static str {
        "tokio"
    }
}

impl Drop for TokioTimerBackend {
    fn drop(&mut self) {
        // Cancel all timers on drop
        for state in self.timers.lock().values() {
            state.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn flag_task(flag: &Arc<AtomicBool>) -> TimerTask {
        let flag = flag.clone();
        Box::pin(async move {
            flag.store(true, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_backend_fires_after_delay() {
        let backend = TokioTimerBackend::new();
        let fired = Arc::new(AtomicBool::new(false));

        backend
            .schedule_once("test", Duration::from_millis(500), flag_task(&fired))
            .unwrap();
        assert!(backend.exists("test"));
        assert_eq!(backend.time_remaining("test"), Some(Duration::from_millis(500)));

        tokio::time::sleep(Duration::from_millis(499)).await;
        assert!(!fired.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(fired.load(Ordering::SeqCst));
        assert!(!backend.exists("test"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_backend_cancel() {
        let backend = TokioTimerBackend::new();
        let fired = Arc::new(AtomicBool::new(false));

        backend
            .schedule_once("test", Duration::from_millis(100), flag_task(&fired))
            .unwrap();
        assert!(backend.cancel("test").unwrap());

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(!fired.load(Ordering::SeqCst));
        assert!(!backend.cancel("test").unwrap());
    }

    #[test]
    fn test_tokio_backend_requires_runtime() {
        let backend = TokioTimerBackend::new();
        let result = backend.schedule_once("test", Duration::from_millis(1), Box::pin(async {}));
        assert!(matches!(result, Err(TelemetryError::Timer(_))));
    }
}
