use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Stable error codes. Names are load-bearing: callers match on them, not on `message`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidRequest,
    UnknownTool,
    ToolNotAllowed,
    InvalidTransition,
    Unauthorized,
    InsufficientCredits,
    RateLimited,
    PlanningFailed,
    DecisionFailed,
    PlanInvalid,
    ToolTimeout,
    ToolFailed,
    HandlerException,
    AllModelsFailed,
    ProviderUnavailable,
    ProviderRateLimited,
    LeaseExpired,
    LeaseExpiredExceeded,
    ConcurrentUpdate,
    RunTimeout,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::UnknownTool => "UNKNOWN_TOOL",
            ErrorCode::ToolNotAllowed => "TOOL_NOT_ALLOWED",
            ErrorCode::InvalidTransition => "INVALID_TRANSITION",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::InsufficientCredits => "INSUFFICIENT_CREDITS",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::PlanningFailed => "PLANNING_FAILED",
            ErrorCode::DecisionFailed => "DECISION_FAILED",
            ErrorCode::PlanInvalid => "PLAN_INVALID",
            ErrorCode::ToolTimeout => "TOOL_TIMEOUT",
            ErrorCode::ToolFailed => "TOOL_FAILED",
            ErrorCode::HandlerException => "HANDLER_EXCEPTION",
            ErrorCode::AllModelsFailed => "ALL_MODELS_FAILED",
            ErrorCode::ProviderUnavailable => "PROVIDER_UNAVAILABLE",
            ErrorCode::ProviderRateLimited => "PROVIDER_RATE_LIMITED",
            ErrorCode::LeaseExpired => "LEASE_EXPIRED",
            ErrorCode::LeaseExpiredExceeded => "LEASE_EXPIRED_EXCEEDED",
            ErrorCode::ConcurrentUpdate => "CONCURRENT_UPDATE",
            ErrorCode::RunTimeout => "RUN_TIMEOUT",
        }
    }

    /// Whether this class of error is retryable by default; call sites may still override
    /// the `recoverable` flag on a concrete `OrchestratorError` instance.
    pub fn default_recoverable(self) -> bool {
        !matches!(
            self,
            ErrorCode::InvalidRequest
                | ErrorCode::UnknownTool
                | ErrorCode::ToolNotAllowed
                | ErrorCode::InvalidTransition
                | ErrorCode::Unauthorized
                | ErrorCode::InsufficientCredits
                | ErrorCode::PlanInvalid
                | ErrorCode::HandlerException
                | ErrorCode::LeaseExpiredExceeded
                | ErrorCode::ConcurrentUpdate
                | ErrorCode::RunTimeout
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error carried on Runs, Steps, and HTTP responses alike.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorError {
    pub code: ErrorCode,
    pub message: String,
    pub recoverable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl OrchestratorError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            recoverable: code.default_recoverable(),
            retry_after_ms: None,
            details: None,
        }
    }

    pub fn recoverable(mut self, recoverable: bool) -> Self {
        self.recoverable = recoverable;
        self
    }

    pub fn retry_after_ms(mut self, ms: u64) -> Self {
        self.retry_after_ms = Some(ms);
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for OrchestratorError {}
