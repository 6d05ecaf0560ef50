/// Error types shared by every resource wrapper
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid {resource} configuration: {message}")]
    Validation {
        resource: &'static str,
        message: String,
    },

    #[error("missing configuration `{field}`: {message}")]
    MissingConfiguration {
        field: &'static str,
        message: String,
    },

    #[error("{provider} error: {message}")]
    Provider {
        provider: &'static str,
        message: String,
    },

    #[error("{resource_type} not found: {name}")]
    NotFound { resource_type: String, name: String },

    #[error("{operation} is not supported for {resource_type}")]
    Unsupported {
        resource_type: &'static str,
        operation: &'static str,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("template error: {0}")]
    Template(#[from] handlebars::RenderError),
}

impl Error {
    pub fn validation(resource: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            resource,
            message: message.into(),
        }
    }

    pub fn missing(field: &'static str, message: impl Into<String>) -> Self {
        Self::MissingConfiguration {
            field,
            message: message.into(),
        }
    }

    pub fn provider(provider: &'static str, message: impl Into<String>) -> Self {
        Self::Provider {
            provider,
            message: message.into(),
        }
    }

    pub fn not_found(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_configuration_names_field() {
        let err = Error::missing("path", "provide path, path_prefix or bucket");
        assert_eq!(
            err.to_string(),
            "missing configuration `path`: provide path, path_prefix or bucket"
        );
    }

    #[test]
    fn test_not_found_detection() {
        assert!(Error::not_found("CacheSubnetGroup", "redis").is_not_found());
        assert!(!Error::provider("aws", "throttled").is_not_found());
    }
}
