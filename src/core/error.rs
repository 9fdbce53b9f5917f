// Copyright 2025
// Licensed under the Elastic License v2.0

use std::fmt;

/// Error types for the CDC core module
#[derive(Debug)]
pub enum CoreError {
    /// Source stream errors (broker, subscription, decoding transport)
    SourceError {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Destination sink errors
    SinkError {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },


    /// Structurally invalid message or row encoding failure
    SerializationError {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A declared timestamp field holds a value that cannot be read as an instant
    TimestampError {
        table: String,
        field: String,
        message: String,
    },
}

impl CoreError {
    pub fn source_error(message: impl Into<String>) -> Self {
        Self::SourceError {
            message: message.into(),
            source: None,
        }
    }

    pub fn source_error_with_cause(
        message: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::SourceError {
            message: message.into(),
            source: Some(Box::new(cause)),
        }
    }

    pub fn sink_error(message: impl Into<String>) -> Self {
        Self::SinkError {
            message: message.into(),
            source: None,
        }
    }

    pub fn serialization_error(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
            source: None,
        }
    }

    pub fn serialization_error_with_cause(
        message: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::SerializationError {
            message: message.into(),
            source: Some(Box::new(cause)),
        }
    }

    pub fn timestamp_error(
        table: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::TimestampError {
            table: table.into(),
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::SourceError { message, source } => {
                write!(f, "Source error: {}", message)?;
                if let Some(src) = source {
                    write!(f, " (caused by: {})", src)?;
                }
                Ok(())
            }
            CoreError::SinkError { message, source } => {
                write!(f, "Sink error: {}", message)?;
                if let Some(src) = source {
                    write!(f, " (caused by: {})", src)?;
                }
                Ok(())
            }
            CoreError::SerializationError { message, source } => {
                write!(f, "Serialization error: {}", message)?;
                if let Some(src) = source {
                    write!(f, " (caused by: {})", src)?;
                }
                Ok(())
            }
            CoreError::TimestampError {
                table,
                field,
                message,
            } => write!(f, "Timestamp error in {}.{}: {}", table, field, message),
        }
    }
}

impl std::error::Error for CoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CoreError::SourceError { source, .. }
            | CoreError::SinkError { source, .. }
            | CoreError::SerializationError { source, .. } => {
                source.as_ref().map(|e| e.as_ref() as &dyn std::error::Error)
            }
            _ => None,
        }
    }
}

/// Result type alias using CoreError
pub type CoreResult<T> = Result<T, CoreError>;
