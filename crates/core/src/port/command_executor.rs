// Command Executor Port
// Abstraction over "run this command line and tell me how it went"

use async_trait::async_trait;

/// Outcome of one execution attempt
///
/// Every non-success variant is an ordinary input to the retry policy,
/// never an engine error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Exit code 0
    Success,
    /// Nonzero exit (or killed by a signal, in which case there is no code)
    ExecutionFailure {
        exit_code: Option<i32>,
        stderr: String,
    },
    /// Still running when the timeout elapsed; the process was killed
    Timeout { after_ms: u64 },
    /// The command could not be started at all
    LaunchError { message: String },
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success)
    }

    /// Human-readable reason for a failed attempt
    pub fn diagnostic(&self) -> String {
        match self {
            ExecutionOutcome::Success => "success".to_string(),
            ExecutionOutcome::ExecutionFailure { exit_code, stderr } => {
                let code = exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string());
                let stderr = stderr.trim();
                if stderr.is_empty() {
                    format!("exit code {}", code)
                } else {
                    format!("exit code {}: {}", code, stderr)
                }
            }
            ExecutionOutcome::Timeout { after_ms } => format!("timed out after {}ms", after_ms),
            ExecutionOutcome::LaunchError { message } => format!("failed to launch: {}", message),
        }
    }
}

/// Command Executor trait
///
/// Implementations:
/// - ShellExecutor: runs the command through the platform shell
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run a command to completion (or timeout)
    async fn run(&self, command: &str) -> ExecutionOutcome;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Mock executor behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Always succeed
        Success,
        /// Always exit with this code
        Fail(i32),
        /// Always time out
        Timeout,
        /// Panic with message (for isolation testing)
        Panic(String),
        /// Play these outcomes in order, then succeed
        Script(Vec<ExecutionOutcome>),
    }

    /// Mock Command Executor for testing
    pub struct MockCommandExecutor {
        behavior: MockBehavior,
        script: Arc<Mutex<VecDeque<ExecutionOutcome>>>,
        commands: Arc<Mutex<Vec<String>>>,
    }

    impl MockCommandExecutor {
        pub fn new(behavior: MockBehavior) -> Self {
            let script = match &behavior {
                MockBehavior::Script(outcomes) => outcomes.iter().cloned().collect(),
                _ => VecDeque::new(),
            };
            Self {
                behavior,
                script: Arc::new(Mutex::new(script)),
                commands: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn new_success() -> Self {
            Self::new(MockBehavior::Success)
        }

        pub fn new_fail(exit_code: i32) -> Self {
            Self::new(MockBehavior::Fail(exit_code))
        }

        pub fn new_timeout() -> Self {
            Self::new(MockBehavior::Timeout)
        }

        pub fn new_panic_inducing(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::Panic(message.into()))
        }

        pub fn new_script(outcomes: Vec<ExecutionOutcome>) -> Self {
            Self::new(MockBehavior::Script(outcomes))
        }

        pub fn call_count(&self) -> usize {
            self.commands.lock().map(|c| c.len()).unwrap_or_default()
        }

        /// Commands received, in call order
        pub fn commands(&self) -> Vec<String> {
            self.commands.lock().map(|c| c.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl CommandExecutor for MockCommandExecutor {
        async fn run(&self, command: &str) -> ExecutionOutcome {
            if let Ok(mut commands) = self.commands.lock() {
                commands.push(command.to_string());
            }

            match &self.behavior {
                MockBehavior::Success => ExecutionOutcome::Success,
                MockBehavior::Fail(code) => ExecutionOutcome::ExecutionFailure {
                    exit_code: Some(*code),
                    stderr: format!("mock failure for '{}'", command),
                },
                MockBehavior::Timeout => ExecutionOutcome::Timeout { after_ms: 300_000 },
                MockBehavior::Panic(msg) => {
                    panic!("{}", msg); // Actually panic for isolation testing
                }
                MockBehavior::Script(_) => self
                    .script
                    .lock()
                    .ok()
                    .and_then(|mut s| s.pop_front())
                    .unwrap_or(ExecutionOutcome::Success),
            }
        }
    }
}
