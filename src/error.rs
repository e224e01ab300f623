use thiserror::Error;

pub type Result<T> = std::result::Result<T, BunstoneError>;

/// Framework errors raised while wiring or running an application.
///
/// Everything except [`BunstoneError::Other`] carries a stable code and a
/// suggestion so the startup crash report can tell the developer what to fix.
#[derive(Debug, Error)]
pub enum BunstoneError {
    #[error("Cannot resolve dependency {type_name}: {message}")]
    DependencyResolution {
        type_name: String,
        message: String,
        suggestion: String,
    },

    #[error("Circular dependency detected: {cycle}")]
    CircularDependency { cycle: String },

    #[error("Failed to downcast type: {type_name}")]
    DowncastFailed { type_name: String },

    #[error("Failed to initialize module {module}: {message}")]
    ModuleInitialization {
        module: String,
        message: String,
        context: Option<String>,
    },

    #[error("{message}")]
    Cqrs { message: String, suggestion: String },

    #[error("Invalid configuration: {message}")]
    Configuration { message: String, suggestion: String },

    #[error("Guard {guard} could not be created: {message}")]
    Guard { guard: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BunstoneError {
    pub fn configuration(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::DependencyResolution { .. } => "BNS-DI-001",
            Self::CircularDependency { .. } => "BNS-DI-002",
            Self::DowncastFailed { .. } => "BNS-DI-003",
            Self::ModuleInitialization { .. } => "BNS-MOD-001",
            Self::Cqrs { .. } => "BNS-CQRS-001",
            Self::Configuration { .. } => "BNS-CFG-001",
            Self::Guard { .. } => "BNS-GRD-001",
            Self::Io(_) => "BNS-IO-001",
            Self::Other(_) => "BNS-000",
        }
    }

    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::DependencyResolution { suggestion, .. }
            | Self::Cqrs { suggestion, .. }
            | Self::Configuration { suggestion, .. } => Some(suggestion.clone()),
            Self::CircularDependency { .. } => Some(
                "Break the cycle by moving the shared logic into a third provider.".to_string(),
            ),
            Self::ModuleInitialization { module, .. } => Some(format!(
                "Check the providers, imports and exports declared by {module}."
            )),
            Self::Guard { guard, .. } => Some(format!(
                "Make sure every dependency of {guard} is provided by the module."
            )),
            Self::DowncastFailed { .. } | Self::Io(_) | Self::Other(_) => None,
        }
    }

    pub fn context(&self) -> Option<&str> {
        match self {
            Self::ModuleInitialization { context, .. } => context.as_deref(),
            _ => None,
        }
    }

    /// Whether the error is already one of the typed framework errors, as
    /// opposed to an opaque failure raised by user code.
    pub fn is_typed(&self) -> bool {
        !matches!(self, Self::Io(_) | Self::Other(_))
    }

    /// Emit a structured crash report for a fatal startup error.
    pub fn report(&self) {
        tracing::error!(
            code = self.code(),
            context = self.context().unwrap_or("-"),
            suggestion = self.suggestion().as_deref().unwrap_or("-"),
            "{self}"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        let err = BunstoneError::CircularDependency {
            cycle: "A -> B -> A".to_string(),
        };
        assert_eq!(err.code(), "BNS-DI-002");
        assert!(err.is_typed());
        assert!(err.suggestion().is_some());

        let err = BunstoneError::from(anyhow::anyhow!("boom"));
        assert_eq!(err.code(), "BNS-000");
        assert!(!err.is_typed());
    }

    #[test]
    fn test_module_initialization_context() {
        let err = BunstoneError::ModuleInitialization {
            module: "UsersModule".to_string(),
            message: "database offline".to_string(),
            context: Some("UserRepository".to_string()),
        };
        assert_eq!(err.context(), Some("UserRepository"));
        assert!(err.to_string().contains("UsersModule"));
    }
}
