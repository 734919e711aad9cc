//! Timer backend implementations
//!
//! - `TokioTimerBackend`: spawns a tokio task per timer
//! - `MockTimerBackend`: records timers and runs them on a virtual clock
//!
//! ## Choosing a Backend
//!
//! - **Tests**: Use `MockTimerBackend`, or `TokioTimerBackend` under a
//!   paused tokio clock
//! - **Applications**: Use `TokioTimerBackend`

mod mock;
mod tokio_backend;

pub use mock::{MockTimerBackend, RecordedTimer};
pub use tokio_backend::TokioTimerBackend;
