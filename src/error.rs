//! Error types.
//!
//! - [`EngineError`] is returned by the fitting engine (models, components,
//!   optimizer session, data validation).
//! - [`AppError`] is what the binary reports: a message plus a process exit code.

use thiserror::Error;

/// Failures raised by the fitting engine.
///
/// Configuration problems that have a sensible fallback (duplicate component
/// names, unreadable regularization files) are logged and never surface here.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error("component '{component}' has {found} starting RVs but the data has {expected} epochs")]
    EpochMismatch {
        component: String,
        expected: usize,
        found: usize,
    },

    #[error("order index {order} is out of range (data has {n_orders} orders)")]
    UnknownOrder { order: usize, n_orders: usize },

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("component '{component}': invalid template grid: {reason}")]
    InvalidTemplateGrid { component: String, reason: String },

    #[error("component '{component}': {k} basis vectors requested but at most {max} are supported")]
    TooManyBases {
        component: String,
        k: usize,
        max: usize,
    },

    #[error("component '{component}': no data with positive inverse variance falls on the template grid")]
    EmptyTemplate { component: String },

    #[error("component '{component}': degenerate basis: {reason}")]
    DegenerateBasis { component: String, reason: String },

    #[error("component '{component}' has not been initialized")]
    NotInitialized { component: String },

    #[error("non-finite {quantity} for {}", failure_site(.component, .iteration))]
    NonFinite {
        component: Option<String>,
        quantity: &'static str,
        iteration: Option<usize>,
    },

    #[error("model has no components")]
    NoComponents,

    #[error("model has not been set up")]
    NotSetUp,

    #[error("model is already set up; its structure is frozen")]
    AlreadySetUp,

    #[error("optimizer session does not match this model: {0}")]
    SessionMismatch(String),
}

fn failure_site(component: &Option<String>, iteration: &Option<usize>) -> String {
    let name = component.as_deref().unwrap_or("model");
    match iteration {
        Some(i) => format!("{name} at iteration {i}"),
        None => name.to_string(),
    }
}

impl EngineError {
    pub(crate) fn non_finite(component: Option<&str>, quantity: &'static str) -> Self {
        EngineError::NonFinite {
            component: component.map(str::to_string),
            quantity,
            iteration: None,
        }
    }

    /// Attach the optimization iteration at which a numerical failure occurred.
    pub(crate) fn at_iteration(self, i: usize) -> Self {
        match self {
            EngineError::NonFinite {
                component,
                quantity,
                ..
            } => EngineError::NonFinite {
                component,
                quantity,
                iteration: Some(i),
            },
            other => other,
        }
    }

    /// Exit code used when the error reaches the binary.
    pub fn exit_code(&self) -> u8 {
        match self {
            EngineError::NonFinite { .. }
            | EngineError::EmptyTemplate { .. }
            | EngineError::DegenerateBasis { .. } => 4,
            _ => 2,
        }
    }
}

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        AppError::new(err.exit_code(), err.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_finite_message_names_component_and_iteration() {
        let err = EngineError::non_finite(Some("star"), "rvs").at_iteration(7);
        let msg = err.to_string();
        assert!(msg.contains("star"), "{msg}");
        assert!(msg.contains("rvs"), "{msg}");
        assert!(msg.contains("iteration 7"), "{msg}");
        assert_eq!(AppError::from(err).exit_code(), 4);
    }

    #[test]
    fn configuration_errors_map_to_exit_code_two() {
        let err = EngineError::EpochMismatch {
            component: "star".into(),
            expected: 5,
            found: 4,
        };
        assert_eq!(AppError::from(err).exit_code(), 2);
    }
}
