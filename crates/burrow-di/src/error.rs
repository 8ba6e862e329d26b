//! Error types for bean registration, resolution and shutdown

use crate::container::ContainerState;
use crate::definition::{BeanDefinition, TypeKey};

/// Errors that can occur during dependency injection operations
#[derive(Debug, thiserror::Error)]
pub enum DIError {
    #[error("No bean registered for {type_name}{}", qualifier_suffix(.qualifier))]
    NotFound {
        type_name: String,
        qualifier: Option<String>,
    },

    #[error("Circular dependency detected: {}", .cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },

    #[error("Failed to create bean {bean}: {source}")]
    CreationFailed {
        bean: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to destroy bean {bean}: {source}")]
    DestroyFailed {
        bean: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{} bean(s) failed to shut down cleanly", .failures.len())]
    ShutdownFailed { failures: Vec<DIError> },

    #[error("{} of the beans assignable to {type_name} failed to resolve", .failures.len())]
    LookupsFailed {
        type_name: String,
        failures: Vec<DIError>,
    },

    #[error("Cannot {operation} while the container is {state}")]
    InvalidState {
        operation: &'static str,
        state: ContainerState,
    },

    #[error("Invalid service type: {message}")]
    InvalidServiceType { message: String },

    #[error("Bean {bean} uses scope '{scope}' which is not registered")]
    UnknownScope { bean: String, scope: String },

    #[error("Awaiter {bean} failed: {source}")]
    AwaitFailed {
        bean: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] burrow_common::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type DIResult<T> = Result<T, DIError>;

fn qualifier_suffix(qualifier: &Option<String>) -> String {
    match qualifier {
        Some(q) => format!(" (qualifier '{}')", q),
        None => String::new(),
    }
}

impl DIError {
    pub(crate) fn not_found(key: &TypeKey, qualifier: Option<&str>) -> Self {
        DIError::NotFound {
            type_name: key.name().to_string(),
            qualifier: qualifier.map(str::to_string),
        }
    }

    /// Map a factory or hook error onto the taxonomy. Errors that already
    /// are `DIError`s (a nested lookup that failed) pass through untouched.
    pub(crate) fn from_factory(definition: &BeanDefinition, error: anyhow::Error) -> Self {
        match error.downcast::<DIError>() {
            Ok(inner) => inner,
            Err(source) => DIError::CreationFailed {
                bean: definition.display_name(),
                source,
            },
        }
    }

    pub(crate) fn type_mismatch(expected: &str) -> Self {
        DIError::InvalidServiceType {
            message: format!("bean value is not a {}", expected),
        }
    }

    /// Fold destroy failures into a single result
    pub(crate) fn from_shutdown(failures: Vec<DIError>) -> DIResult<()> {
        if failures.is_empty() {
            Ok(())
        } else {
            Err(DIError::ShutdownFailed { failures })
        }
    }

    /// Fold per-element lookup failures into a single error: one failure is
    /// returned as-is, several are aggregated.
    pub(crate) fn from_lookups(key: &TypeKey, mut failures: Vec<DIError>) -> Self {
        if failures.len() == 1 {
            if let Some(only) = failures.pop() {
                return only;
            }
        }
        DIError::LookupsFailed {
            type_name: key.name().to_string(),
            failures,
        }
    }

    /// True for a plain "nothing registered" result
    pub fn is_not_found(&self) -> bool {
        matches!(self, DIError::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        let err = DIError::not_found(&TypeKey::of::<String>(), Some("primary"));
        assert_eq!(
            err.to_string(),
            "No bean registered for alloc::string::String (qualifier 'primary')"
        );
        assert!(err.is_not_found());
    }

    #[test]
    fn test_cycle_message() {
        let err = DIError::CircularDependency {
            cycle: vec!["A".into(), "B".into(), "A".into()],
        };
        assert_eq!(err.to_string(), "Circular dependency detected: A -> B -> A");
    }

    #[test]
    fn test_single_lookup_failure_is_not_aggregated() {
        let key = TypeKey::of::<u8>();
        let err = DIError::from_lookups(&key, vec![DIError::not_found(&key, None)]);
        assert!(err.is_not_found());

        let err = DIError::from_lookups(
            &key,
            vec![DIError::not_found(&key, None), DIError::not_found(&key, None)],
        );
        assert!(matches!(err, DIError::LookupsFailed { ref failures, .. } if failures.len() == 2));
    }

    #[test]
    fn test_shutdown_fold() {
        assert!(DIError::from_shutdown(Vec::new()).is_ok());
        let result = DIError::from_shutdown(vec![DIError::DestroyFailed {
            bean: "x".into(),
            source: anyhow::anyhow!("boom"),
        }]);
        assert!(matches!(result, Err(DIError::ShutdownFailed { .. })));
    }
}
