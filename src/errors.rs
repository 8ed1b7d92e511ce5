use std::fmt;
use std::path::PathBuf;

/// Result type alias for objcache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for objcache operations
#[derive(Debug)]
pub enum Error {
    /// Malformed input data: response files, dependency reports, serialized
    /// cache entries
    InvalidInput { message: String },

    /// Environment variable related errors
    Environment { variable: String, message: String },

    /// Invocation shapes that disable caching (the dispatcher falls back to
    /// running the compiler directly)
    Configuration { message: String },

    /// Features the wrapper deliberately does not cache
    Unsupported { feature: String, message: String },

    /// Command execution errors
    CommandExecution {
        command: String,
        args: Vec<String>,
        message: String,
        exit_code: Option<i32>,
    },

    /// File system operations
    FileSystem {
        path: PathBuf,
        operation: String,
        source: std::io::Error,
    },

    /// JSON serialization/deserialization errors
    Json {
        message: String,
        source: serde_json::Error,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidInput { message } => {
                write!(f, "invalid input: {message}")
            }
            Error::Environment { variable, message } => {
                write!(f, "environment variable '{variable}' error: {message}")
            }
            Error::Configuration { message } => {
                write!(f, "configuration error: {message}")
            }
            Error::Unsupported { feature, message } => {
                write!(f, "unsupported invocation '{feature}': {message}")
            }
            Error::CommandExecution {
                command,
                args,
                message,
                exit_code,
            } => {
                let args_str = args.join(" ");
                match exit_code {
                    Some(code) => write!(
                        f,
                        "command '{}{}' failed with exit code {}: {}",
                        command,
                        if args_str.is_empty() {
                            String::new()
                        } else {
                            format!(" {args_str}")
                        },
                        code,
                        message
                    ),
                    None => write!(
                        f,
                        "command '{}{}' failed: {}",
                        command,
                        if args_str.is_empty() {
                            String::new()
                        } else {
                            format!(" {args_str}")
                        },
                        message
                    ),
                }
            }
            Error::FileSystem {
                path,
                operation,
                source,
            } => {
                write!(
                    f,
                    "file system {} operation failed for '{}': {}",
                    operation,
                    path.display(),
                    source
                )
            }
            Error::Json { message, .. } => {
                write!(f, "JSON error: {message}")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::FileSystem { source, .. } => Some(source),
            Error::Json { source, .. } => Some(source),
            _ => None,
        }
    }
}

// Conversion implementations
impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::FileSystem {
            path: PathBuf::new(),
            operation: "unknown".to_string(),
            source: error,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Json {
            message: error.to_string(),
            source: error,
        }
    }
}

// Helper methods for creating errors with context
impl Error {
    /// Create an invalid-input error
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Error::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an environment variable error
    #[must_use]
    pub fn environment(variable: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Environment {
            variable: variable.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
        }
    }

    /// Create an unsupported invocation error
    #[must_use]
    pub fn unsupported(feature: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Unsupported {
            feature: feature.into(),
            message: message.into(),
        }
    }

    /// Create a command execution error
    #[must_use]
    pub fn command_execution(
        command: impl Into<String>,
        args: Vec<String>,
        message: impl Into<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Error::CommandExecution {
            command: command.into(),
            args,
            message: message.into(),
            exit_code,
        }
    }

    /// Create a file system error with context
    #[must_use]
    pub fn file_system(
        path: impl Into<PathBuf>,
        operation: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Error::FileSystem {
            path: path.into(),
            operation: operation.into(),
            source,
        }
    }

    /// True for invocation shapes that merely disable caching, as opposed to
    /// hard failures of the current invocation
    #[must_use]
    pub fn disables_caching(&self) -> bool {
        matches!(
            self,
            Error::Configuration { .. } | Error::Unsupported { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = Error::configuration("single object file path for multiple inputs");
        assert_eq!(
            err.to_string(),
            "configuration error: single object file path for multiple inputs"
        );

        let err = Error::environment("INCLUDE", "not set");
        assert_eq!(
            err.to_string(),
            "environment variable 'INCLUDE' error: not set"
        );
    }

    #[test]
    fn test_command_execution_with_exit_code() {
        let err = Error::command_execution(
            "cl",
            vec!["/c".to_string(), "foo.cpp".to_string()],
            "compiler failed",
            Some(2),
        );
        assert_eq!(
            err.to_string(),
            "command 'cl /c foo.cpp' failed with exit code 2: compiler failed"
        );
    }

    #[test]
    fn test_disables_caching() {
        assert!(Error::configuration("x").disables_caching());
        assert!(Error::unsupported("link", "x").disables_caching());
        assert!(!Error::invalid_input("x").disables_caching());
    }
}
