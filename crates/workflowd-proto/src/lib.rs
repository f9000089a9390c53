// ABOUTME: Wire messages for the workflowd protocol and the generated gRPC service.
// ABOUTME: Command flows dispatcher -> agent, TaskStatus flows agent -> dispatcher.

#![allow(clippy::derive_partial_eq_without_eq)]

/// A directive sent from the dispatcher to a connected agent.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Command {
    #[prost(enumeration = "command::Kind", tag = "1")]
    pub kind: i32,
    /// Unique per command, assigned by the dispatcher.
    #[prost(string, tag = "2")]
    pub task_id: String,
    #[prost(string, tag = "3")]
    pub executable: String,
    #[prost(string, repeated, tag = "4")]
    pub args: Vec<String>,
}

/// Nested types for [`Command`].
pub mod command {
    /// What the agent should do with a command. New kinds are appended here;
    /// agents ignore kinds they do not understand.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Kind {
        Start = 0,
    }

    impl Kind {
        pub fn as_str_name(&self) -> &'static str {
            match self {
                Kind::Start => "START",
            }
        }
    }
}

/// A report from an agent about one task.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TaskStatus {
    #[prost(string, tag = "1")]
    pub task_id: String,
    #[prost(enumeration = "task_status::State", tag = "2")]
    pub state: i32,
    #[prost(string, tag = "3")]
    pub message: String,
    /// Agent-local epoch seconds. Display only.
    #[prost(int64, tag = "4")]
    pub timestamp: i64,
}

/// Nested types for [`TaskStatus`].
pub mod task_status {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum State {
        Pending = 0,
        Running = 1,
        Completed = 2,
        Failed = 3,
    }

    impl State {
        pub fn as_str_name(&self) -> &'static str {
            match self {
                State::Pending => "PENDING",
                State::Running => "RUNNING",
                State::Completed => "COMPLETED",
                State::Failed => "FAILED",
            }
        }

        /// COMPLETED and FAILED end a task; nothing may follow them.
        pub fn is_terminal(&self) -> bool {
            matches!(self, State::Completed | State::Failed)
        }
    }
}

impl Command {
    /// Build a START command.
    pub fn start(task_id: impl Into<String>, executable: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            kind: command::Kind::Start as i32,
            task_id: task_id.into(),
            executable: executable.into(),
            args,
        }
    }
}

impl TaskStatus {
    pub fn new(
        task_id: impl Into<String>,
        state: task_status::State,
        message: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            state: state as i32,
            message: message.into(),
            timestamp,
        }
    }
}

mod service {
    include!(concat!(env!("OUT_DIR"), "/workflowd.WorkflowService.rs"));
}

// Re-export client types under a client module
pub mod client {
    pub use super::service::workflow_service_client::WorkflowServiceClient;
}

// Re-export server types under a server module
pub mod server {
    pub use super::service::workflow_service_server::{WorkflowService, WorkflowServiceServer};
}
