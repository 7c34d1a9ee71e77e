//! Centralized Error Handling Module
//!
//! Every hard failure carries a unique error code so logs and callers can
//! tell them apart without string matching.
//!
//! Error codes follow pattern: CATEGORY_SPECIFIC_ERROR
//! - FEATURE_xxx: feature processing errors
//! - MODEL_xxx: ensemble / meta-learner errors
//! - TRAIN_xxx: training cycle errors
//! - STORE_xxx: artifact persistence errors
//! - CFG_xxx: configuration errors
//!
//! Degraded quality (a broken base model, a failing derived feature) is
//! NOT an error: it is reported through `uncertainty` on the assessment.

use std::fmt;

/// Application-wide error type
#[derive(Debug)]
pub struct AppError {
    /// Unique error code for logging/monitoring
    pub code: ErrorCode,
    /// Human-readable message
    pub message: String,
    /// Optional underlying error
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AppError {
    /// Create a new AppError
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create AppError with source error
    pub fn with_source(
        code: ErrorCode,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Get error code as string (for logging)
    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Unique error codes for monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // ============================================
    // Feature Errors (1xx)
    // ============================================
    /// A required (non-derivable) column is absent from the batch
    FeatureMissing,
    /// Derived feature formula could not be parsed
    FormulaParse,
    /// Derived feature formula failed to evaluate (handled internally)
    FormulaEval,

    // ============================================
    // Model Errors (2xx)
    // ============================================
    /// No meta-learner is loaded (or its layout does not fit the ensemble)
    ModelNotReady,
    /// A base model failed to score (handled internally)
    BaseModelFailed,

    // ============================================
    // Training Errors (3xx)
    // ============================================
    /// Training data is unusable (missing target, single class, ...)
    InvalidTrainingData,
    /// Another training cycle holds the writer slot
    TrainingInProgress,

    // ============================================
    // Persistence Errors (4xx)
    // ============================================
    /// Unrecoverable artifact I/O
    PersistenceFailure,
    /// Requested artifact version does not exist
    VersionNotFound,

    // ============================================
    // Configuration Errors (5xx)
    // ============================================
    /// Invalid configuration value
    ConfigInvalidValue,

    // ============================================
    // Generic Errors (9xx)
    // ============================================
    /// Unknown error
    Unknown,
}

impl ErrorCode {
    /// Get string representation of error code
    pub fn as_str(&self) -> &'static str {
        match self {
            // Feature Errors
            Self::FeatureMissing => "FEATURE_MISSING",
            Self::FormulaParse => "FEATURE_FORMULA_PARSE",
            Self::FormulaEval => "FEATURE_FORMULA_EVAL",

            // Model Errors
            Self::ModelNotReady => "MODEL_NOT_READY",
            Self::BaseModelFailed => "MODEL_BASE_FAILED",

            // Training Errors
            Self::InvalidTrainingData => "TRAIN_INVALID_DATA",
            Self::TrainingInProgress => "TRAIN_IN_PROGRESS",

            // Persistence Errors
            Self::PersistenceFailure => "STORE_PERSISTENCE_FAILURE",
            Self::VersionNotFound => "STORE_VERSION_NOT_FOUND",

            // Configuration Errors
            Self::ConfigInvalidValue => "CFG_INVALID_VALUE",

            // Generic
            Self::Unknown => "UNKNOWN_ERROR",
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TrainingInProgress | Self::PersistenceFailure)
    }
}

// ============================================
// Convenience constructors
// ============================================

impl AppError {
    /// Required feature column absent
    pub fn feature_missing(feature: &str) -> Self {
        Self::new(
            ErrorCode::FeatureMissing,
            format!("Required feature '{}' is absent from the batch", feature),
        )
    }

    /// Formula parse failure
    pub fn formula_parse(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::FormulaParse, msg)
    }

    /// Formula evaluation failure
    pub fn formula_eval(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::FormulaEval, msg)
    }

    /// No meta-learner loaded
    pub fn model_not_ready(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ModelNotReady, msg)
    }

    /// Base model failure
    pub fn base_model_failed(model: &str, msg: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::BaseModelFailed,
            format!("{}: {}", model, msg.into()),
        )
    }

    /// Invalid training data
    pub fn invalid_training_data(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidTrainingData, msg)
    }

    /// Training already running
    pub fn training_in_progress() -> Self {
        Self::new(
            ErrorCode::TrainingInProgress,
            "Another training cycle is already running",
        )
    }

    /// Artifact I/O failure
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::PersistenceFailure, msg)
    }

    /// Unknown version
    pub fn version_not_found(version: &str) -> Self {
        Self::new(
            ErrorCode::VersionNotFound,
            format!("Model version '{}' not found", version),
        )
    }

    /// Invalid configuration value
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigInvalidValue, msg)
    }
}

// ============================================
// Result type alias
// ============================================

/// Application Result type
pub type AppResult<T> = Result<T, AppError>;

// ============================================
// Conversion from common error types
// ============================================

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::with_source(ErrorCode::PersistenceFailure, "IO error", err)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::with_source(ErrorCode::PersistenceFailure, "JSON (de)serialization error", err)
    }
}
