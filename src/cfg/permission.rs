//! Permission declarations.
//!
//! Links may declare the platform permissions they need; a chain exposes
//! the deduplicated union across its links.

use std::fmt;

/// The platform a permission applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Platform {
    /// Amazon Web Services.
    Aws,
    /// Google Cloud Platform.
    Gcp,
    /// Microsoft Azure.
    Azure,
    /// GitHub.
    GitHub,
    /// Any other platform, by name.
    Custom(String),
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aws => write!(f, "AWS"),
            Self::Gcp => write!(f, "GCP"),
            Self::Azure => write!(f, "Azure"),
            Self::GitHub => write!(f, "GitHub"),
            Self::Custom(name) => write!(f, "{name}"),
        }
    }
}

/// A (platform, permission-string) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Permission {
    /// The platform the permission applies to.
    pub platform: Platform,
    /// The permission string, in the platform's own vocabulary.
    pub permission: String,
}

impl Permission {
    /// Creates a permission record.
    #[must_use]
    pub fn new(platform: Platform, permission: impl Into<String>) -> Self {
        Self {
            platform,
            permission: permission.into(),
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.platform, self.permission)
    }
}
