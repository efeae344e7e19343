use std::fmt;

/// Core error types for generated CLIs
#[derive(Debug)]
pub enum CliforgeError {
    /// Configuration loading, merging or validation errors
    Config(ConfigError),

    /// Workflow definition and DAG construction errors
    Workflow(WorkflowError),

    /// Expression compilation and evaluation errors
    Expression(ExpressionError),

    /// Step execution errors
    Step(StepError),

    /// HTTP transport errors
    Http(HttpError),

    /// Timeout of a workflow, poll loop or stream read
    Timeout(TimeoutError),

    /// Propagated cancellation signal
    Cancelled(String),

    /// Rollback failures, reported alongside the primary error
    Rollback(RollbackError),

    /// Spec cache errors
    Cache(CacheError),

    /// Event stream and watch errors
    Watch(WatchError),

    /// Internal system errors
    Internal(String),
}

/// Configuration loading, merging or validation errors
#[derive(Debug)]
pub enum ConfigError {
    /// Configuration file could not be read
    FileRead { path: String, reason: String },

    /// Configuration document could not be parsed
    ParseFailed { path: String, reason: String },

    /// One or more field-level validation failures
    Validation(Vec<FieldViolation>),

    /// Environment variable maps to no known configuration path
    UnknownEnvPath { variable: String, path: String },

    /// Requested profile does not exist in api.environments
    UnknownProfile(String),
}

/// A single field-level validation failure
#[derive(Debug, Clone)]
pub struct FieldViolation {
    /// Dotted path of the offending field
    pub path: String,
    /// What was wrong with it
    pub message: String,
}

/// Workflow definition and DAG construction errors
#[derive(Debug)]
pub enum WorkflowError {
    /// A step has an empty id
    MissingStepId,

    /// Two steps share the same id
    DuplicateStepId(String),

    /// depends_on names a step that does not exist
    UnknownDependency { step: String, dependency: String },

    /// A template reference names a step that does not exist
    UnknownReference { step: String, reference: String },

    /// The dependency graph contains a cycle
    CyclicDependency(String),

    /// More than one variant payload populated, or none at all
    InvalidVariant { step: String, reason: String },

    /// Workflow document could not be parsed
    ParseFailed(String),
}

/// Expression compilation and evaluation errors
#[derive(Debug)]
pub enum ExpressionError {
    /// The expression could not be compiled
    Compile { expression: String, reason: String },

    /// The expression failed at evaluation time
    Eval { expression: String, reason: String },

    /// A boolean context received a non-boolean result
    NotBoolean { expression: String, actual: String },
}

/// Step execution errors
#[derive(Debug)]
pub enum StepError {
    /// Step handler failed
    ExecutionFailed { step: String, reason: String },

    /// Plugin steps are not executable in this build
    PluginUnavailable { step: String, plugin: String },

    /// Required step failed, aborting the workflow
    RequiredStepFailed { step: String, reason: String },
}

/// HTTP transport errors
#[derive(Debug)]
pub enum HttpError {
    /// Server answered with a failure status
    Status { status: u16, body: String },

    /// Request could not be performed at all
    Transport(String),

    /// Response body could not be decoded
    Decode(String),
}

/// Timeout of a workflow, poll loop or stream read
#[derive(Debug)]
pub enum TimeoutError {
    /// Workflow exceeded settings.timeout_seconds
    Workflow { workflow_id: String, limit_seconds: u64 },

    /// Wait-step polling exceeded its timeout
    Polling { endpoint: String, limit_seconds: u64 },

    /// Stream connection or read timed out
    Stream(String),
}

/// Rollback failures, reported alongside the primary error
#[derive(Debug)]
pub struct RollbackError {
    /// Number of rollback actions that were executed
    pub executed: usize,
    /// Per-action failure messages
    pub failures: Vec<String>,
}

/// Spec cache errors
#[derive(Debug)]
pub enum CacheError {
    /// Lookup miss; a sentinel for the caller, not a failure
    Miss(String),

    /// Cache write failed
    WriteFailed(String),

    /// Cache entry could not be decoded
    Corrupted(String),
}

/// Event stream and watch errors
#[derive(Debug)]
pub enum WatchError {
    /// Connection to the event stream failed
    ConnectFailed(String),

    /// The stream closed and reconnection attempts are exhausted
    ReconnectExhausted { attempts: u32 },

    /// A subscribed handler returned an error
    Handler { event_type: String, reason: String },

    /// A malformed frame was received
    Protocol(String),
}

impl fmt::Display for CliforgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliforgeError::Config(e) => write!(f, "Configuration error: {}", e),
            CliforgeError::Workflow(e) => write!(f, "Workflow error: {}", e),
            CliforgeError::Expression(e) => write!(f, "Expression error: {}", e),
            CliforgeError::Step(e) => write!(f, "Step error: {}", e),
            CliforgeError::Http(e) => write!(f, "HTTP error: {}", e),
            CliforgeError::Timeout(e) => write!(f, "Timeout: {}", e),
            CliforgeError::Cancelled(what) => write!(f, "Cancelled: {}", what),
            CliforgeError::Rollback(e) => write!(f, "Rollback error: {}", e),
            CliforgeError::Cache(e) => write!(f, "Cache error: {}", e),
            CliforgeError::Watch(e) => write!(f, "Watch error: {}", e),
            CliforgeError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileRead { path, reason } => {
                write!(f, "Failed to read configuration file {}: {}", path, reason)
            }
            ConfigError::ParseFailed { path, reason } => {
                write!(f, "Failed to parse configuration file {}: {}", path, reason)
            }
            ConfigError::Validation(violations) => {
                write!(f, "{} validation failure(s):", violations.len())?;
                for v in violations {
                    write!(f, "\n  {}: {}", v.path, v.message)?;
                }
                Ok(())
            }
            ConfigError::UnknownEnvPath { variable, path } => {
                write!(f, "Environment variable {} maps to unknown path {}", variable, path)
            }
            ConfigError::UnknownProfile(name) => write!(f, "Unknown profile: {}", name),
        }
    }
}

impl fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowError::MissingStepId => write!(f, "Step id must not be empty"),
            WorkflowError::DuplicateStepId(id) => write!(f, "Duplicate step id: {}", id),
            WorkflowError::UnknownDependency { step, dependency } => {
                write!(f, "Step '{}' depends on unknown step '{}'", step, dependency)
            }
            WorkflowError::UnknownReference { step, reference } => {
                write!(f, "Step '{}' references unknown step '{}'", step, reference)
            }
            WorkflowError::CyclicDependency(id) => {
                write!(f, "Cyclic dependency involving step '{}'", id)
            }
            WorkflowError::InvalidVariant { step, reason } => {
                write!(f, "Invalid step variant for '{}': {}", step, reason)
            }
            WorkflowError::ParseFailed(reason) => write!(f, "Failed to parse workflow: {}", reason),
        }
    }
}

impl fmt::Display for ExpressionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpressionError::Compile { expression, reason } => {
                write!(f, "Failed to compile '{}': {}", expression, reason)
            }
            ExpressionError::Eval { expression, reason } => {
                write!(f, "Failed to evaluate '{}': {}", expression, reason)
            }
            ExpressionError::NotBoolean { expression, actual } => {
                write!(f, "Condition '{}' did not evaluate to a boolean (got {})", expression, actual)
            }
        }
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepError::ExecutionFailed { step, reason } => {
                write!(f, "Step '{}' failed: {}", step, reason)
            }
            StepError::PluginUnavailable { step, plugin } => {
                write!(f, "Step '{}' requires plugin '{}' which is not available", step, plugin)
            }
            StepError::RequiredStepFailed { step, reason } => {
                write!(f, "Required step '{}' failed: {}", step, reason)
            }
        }
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpError::Status { status, body } => {
                if body.is_empty() {
                    write!(f, "HTTP {}", status)
                } else {
                    write!(f, "HTTP {}: {}", status, body)
                }
            }
            HttpError::Transport(reason) => write!(f, "Transport failure: {}", reason),
            HttpError::Decode(reason) => write!(f, "Failed to decode response: {}", reason),
        }
    }
}

impl fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutError::Workflow { workflow_id, limit_seconds } => {
                write!(f, "Workflow '{}' exceeded {}s", workflow_id, limit_seconds)
            }
            TimeoutError::Polling { endpoint, limit_seconds } => {
                write!(f, "Polling {} exceeded {}s", endpoint, limit_seconds)
            }
            TimeoutError::Stream(what) => write!(f, "Stream timed out: {}", what),
        }
    }
}

impl fmt::Display for RollbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} rollback action(s) failed",
            self.failures.len(),
            self.executed
        )?;
        for failure in &self.failures {
            write!(f, "\n  {}", failure)?;
        }
        Ok(())
    }
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Miss(key) => write!(f, "Cache miss for key: {}", key),
            CacheError::WriteFailed(reason) => write!(f, "Cache write failed: {}", reason),
            CacheError::Corrupted(reason) => write!(f, "Cache entry corrupted: {}", reason),
        }
    }
}

impl fmt::Display for WatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchError::ConnectFailed(reason) => write!(f, "Failed to connect: {}", reason),
            WatchError::ReconnectExhausted { attempts } => {
                write!(f, "Gave up reconnecting after {} attempt(s)", attempts)
            }
            WatchError::Handler { event_type, reason } => {
                write!(f, "Handler for '{}' events failed: {}", event_type, reason)
            }
            WatchError::Protocol(reason) => write!(f, "Malformed stream frame: {}", reason),
        }
    }
}

impl std::error::Error for CliforgeError {}
impl std::error::Error for ConfigError {}
impl std::error::Error for WorkflowError {}
impl std::error::Error for ExpressionError {}
impl std::error::Error for StepError {}
impl std::error::Error for HttpError {}
impl std::error::Error for TimeoutError {}
impl std::error::Error for RollbackError {}
impl std::error::Error for CacheError {}
impl std::error::Error for WatchError {}

/// Result type for cliforge operations
pub type CliforgeResult<T> = Result<T, CliforgeError>;

impl From<ConfigError> for CliforgeError {
    fn from(err: ConfigError) -> Self {
        CliforgeError::Config(err)
    }
}

impl From<WorkflowError> for CliforgeError {
    fn from(err: WorkflowError) -> Self {
        CliforgeError::Workflow(err)
    }
}

impl From<ExpressionError> for CliforgeError {
    fn from(err: ExpressionError) -> Self {
        CliforgeError::Expression(err)
    }
}

impl From<HttpError> for CliforgeError {
    fn from(err: HttpError) -> Self {
        CliforgeError::Http(err)
    }
}

impl From<CacheError> for CliforgeError {
    fn from(err: CacheError) -> Self {
        CliforgeError::Cache(err)
    }
}

impl From<WatchError> for CliforgeError {
    fn from(err: WatchError) -> Self {
        CliforgeError::Watch(err)
    }
}

impl From<reqwest::Error> for CliforgeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CliforgeError::Timeout(TimeoutError::Stream(err.to_string()))
        } else if err.is_decode() {
            CliforgeError::Http(HttpError::Decode(err.to_string()))
        } else {
            CliforgeError::Http(HttpError::Transport(err.to_string()))
        }
    }
}

impl From<std::io::Error> for CliforgeError {
    fn from(err: std::io::Error) -> Self {
        CliforgeError::Internal(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for CliforgeError {
    fn from(err: serde_json::Error) -> Self {
        CliforgeError::Internal(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_accumulate_in_display() {
        let err = ConfigError::Validation(vec![
            FieldViolation {
                path: "metadata.name".to_string(),
                message: "must not be empty".to_string(),
            },
            FieldViolation {
                path: "api.base_url".to_string(),
                message: "not a valid URL".to_string(),
            },
        ]);
        let rendered = err.to_string();
        assert!(rendered.contains("2 validation failure(s)"));
        assert!(rendered.contains("metadata.name"));
        assert!(rendered.contains("api.base_url"));
    }

    #[test]
    fn cache_miss_is_distinguishable() {
        let err = CacheError::Miss("spec:v1".to_string());
        assert!(matches!(err, CacheError::Miss(_)));
        assert!(err.to_string().contains("spec:v1"));
    }

    #[test]
    fn rollback_error_reports_counts() {
        let err = RollbackError {
            executed: 3,
            failures: vec!["delete_resource: HTTP 500".to_string()],
        };
        assert!(err.to_string().contains("1 of 3"));
    }
}
