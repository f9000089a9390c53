// ABOUTME: workflowd agent - receives commands from the dispatcher and reports task status
// ABOUTME: Executor abstraction, per-task runners and the stream runtime

pub mod error;
pub mod executor;
pub mod runner;
pub mod runtime;
pub mod status;

pub use error::AgentError;
pub use executor::{ExecEvent, ExecSpec, Executor, ProcessExecutor, ProcessExecutorConfig};
pub use runner::run_task;
pub use runtime::{AgentRuntime, RuntimeExit};
pub use status::StatusSender;
