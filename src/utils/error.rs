use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error in '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration field: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid catalog: {message}")]
    InvalidCatalog { message: String },

    #[error("Invalid answer spec for question {question_id}: {message}")]
    InvalidAnswerSpec { question_id: u64, message: String },

    #[error("No placement for grade {grade}, rank band '{rank_band}': {reason}")]
    PlacementNotFound {
        grade: u8,
        rank_band: String,
        reason: String,
    },

    #[error("Tier {0} not found")]
    TierNotFound(u64),

    #[error("Exam {0} not found")]
    ExamNotFound(u64),

    #[error("Session {0} not found")]
    SessionNotFound(u64),

    #[error("Question {question_id} does not belong to exam {exam_id}")]
    QuestionNotInExam { question_id: u64, exam_id: u64 },

    #[error("Malformed answer for question {question_id}: {message}")]
    MalformedAnswer { question_id: u64, message: String },

    #[error("Submission rejected for session {session_id}: session is closed")]
    SubmissionRejected { session_id: u64 },

    #[error("Session {session_id} was already completed at {completed_at}")]
    SessionAlreadyCompleted {
        session_id: u64,
        completed_at: DateTime<Utc>,
    },

    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("Session {session_id} is busy, retry the request")]
    SessionBusy { session_id: u64 },

    #[error("Storage error: {message}")]
    Storage { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Catalog,
    Placement,
    Validation,
    Session,
    Authorization,
    Infrastructure,
}

impl EngineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            EngineError::ConfigValidationError { .. }
            | EngineError::InvalidConfigValueError { .. }
            | EngineError::MissingConfigError { .. } => ErrorCategory::Configuration,
            EngineError::InvalidCatalog { .. }
            | EngineError::InvalidAnswerSpec { .. }
            | EngineError::TierNotFound(_)
            | EngineError::ExamNotFound(_) => ErrorCategory::Catalog,
            EngineError::PlacementNotFound { .. } => ErrorCategory::Placement,
            EngineError::QuestionNotInExam { .. } | EngineError::MalformedAnswer { .. } => {
                ErrorCategory::Validation
            }
            EngineError::SessionNotFound(_)
            | EngineError::SubmissionRejected { .. }
            | EngineError::SessionAlreadyCompleted { .. } => ErrorCategory::Session,
            EngineError::Forbidden { .. } => ErrorCategory::Authorization,
            EngineError::IoError(_)
            | EngineError::SerializationError(_)
            | EngineError::SessionBusy { .. }
            | EngineError::Storage { .. } => ErrorCategory::Infrastructure,
        }
    }

    /// 呼叫端可以原樣重試的錯誤
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::SessionBusy { .. } | EngineError::Storage { .. } | EngineError::IoError(_)
        )
    }

    /// 對外回應使用的拒絕代碼
    pub fn rejection_code(&self) -> &'static str {
        match self {
            EngineError::SubmissionRejected { .. } => "session_closed",
            EngineError::MalformedAnswer { .. } | EngineError::QuestionNotInExam { .. } => {
                "validation_error"
            }
            _ => "error",
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
