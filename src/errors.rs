//! Error types for the chainflow framework.
//!
//! Four enums cover the failure surface: [`AdaptError`] for the value
//! adapter, [`LinkError`] for errors returned by link hooks, [`ParamError`]
//! for the parameter registry, and [`ChainError`] for everything stored in
//! a chain's error slot.

use thiserror::Error;

/// Error raised by the value adapter when a payload cannot be reconciled
/// with a consumer's declared input type.
#[derive(Debug, Clone, Error)]
pub enum AdaptError {
    /// The producer's type cannot be adapted to the consumer's type.
    #[error("cannot adapt {from:?} to {to:?}{}", fmt_reason(.reason))]
    Incompatible {
        /// Type name of the value being adapted.
        from: String,
        /// Type name the consumer declared.
        to: String,
        /// Underlying detail, e.g. serde's missing-field message.
        reason: Option<String>,
    },

    /// The input was the explicit null payload or otherwise absent.
    ///
    /// Logged at debug level and never kills a chain, so callers may emit
    /// explicit nulls without consequence under any strictness.
    #[error("input is absent: {0}")]
    Absent(String),
}

fn fmt_reason(reason: &Option<String>) -> String {
    match reason {
        Some(r) => format!(": {r}"),
        None => String::new(),
    }
}

impl AdaptError {
    /// Creates an incompatibility error from two type names.
    #[must_use]
    pub fn incompatible(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::Incompatible {
            from: from.into(),
            to: to.into(),
            reason: None,
        }
    }

    /// Creates an incompatibility error carrying an underlying detail.
    #[must_use]
    pub fn incompatible_because(
        from: impl Into<String>,
        to: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Incompatible {
            from: from.into(),
            to: to.into(),
            reason: Some(reason.into()),
        }
    }

    /// Whether this error should be logged at debug level and skipped.
    #[must_use]
    pub fn is_debug(&self) -> bool {
        matches!(self, Self::Absent(_))
    }
}

/// Error returned by a link's `initialize`, `process`, or `complete` hook.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The link's processing logic failed.
    #[error("process error: {0}")]
    Process(String),

    /// An IO failure inside a link.
    #[error("process error: {0}")]
    Io(#[from] std::io::Error),

    /// An argument lookup or conversion failed inside a link.
    #[error("process error: {0}")]
    Param(#[from] ParamError),

    /// An adaptation performed by the link itself failed.
    #[error("process error: {0}")]
    Adapt(#[from] AdaptError),

    /// The link was rate limited by an external service.
    #[error("rate limited")]
    RateLimited,
}

impl LinkError {
    /// Creates a process error from a message.
    #[must_use]
    pub fn process(message: impl Into<String>) -> Self {
        Self::Process(message.into())
    }
}

/// Error raised by the parameter/argument registry.
#[derive(Debug, Clone, Error)]
pub enum ParamError {
    /// A parameter was declared twice with differing identities.
    #[error("param already exists with name {0:?}")]
    Collision(String),

    /// A bound value does not match the parameter's declared type.
    #[error("parameter {name:?} expects type {expected:?}, but argument value is type {actual:?}")]
    TypeMismatch {
        /// Parameter name.
        name: String,
        /// Declared type tag.
        expected: String,
        /// Type tag of the offending value.
        actual: String,
    },

    /// A required parameter has neither a default nor a bound value.
    #[error("parameter {0:?} is required")]
    Required(String),

    /// A string value failed the parameter's regex validator.
    #[error("error validating regex: value {value:?} does not match regex {pattern:?}")]
    Regex {
        /// Offending value.
        value: String,
        /// Source text of the validator.
        pattern: String,
    },

    /// A CLI string could not be converted to the parameter's type.
    #[error("failed to convert value {value:?} to type {kind:?}: {message}")]
    Convert {
        /// The raw string value.
        value: String,
        /// Target type tag.
        kind: String,
        /// Converter failure detail.
        message: String,
    },

    /// No built-in converter exists for the parameter's type.
    #[error("no converter found for type {0:?}")]
    NoConverter(String),

    /// A shortcode was declared for a type that cannot bind from a string.
    #[error("invalid shortcode for param {name:?}: converter required to use shortcode for type {kind:?}")]
    Shortcode {
        /// Parameter name.
        name: String,
        /// Declared type tag.
        kind: String,
    },

    /// A CLI value token appeared before any flag token.
    #[error("encountered argument with no flag: {0:?}")]
    DanglingValue(String),

    /// An argument lookup found nothing bound under the name.
    #[error("argument {0:?} is unset")]
    Unset(String),

    /// An argument value is bound but not of the requested type.
    #[error("requested type {expected:?}, but arg value is of type {actual:?}")]
    WrongType {
        /// Requested type name.
        expected: String,
        /// Actual type tag of the bound value.
        actual: String,
    },
}

/// Error stored in a chain's first-error-wins slot and returned by
/// `Chain::error`.
#[derive(Debug, Clone, Error)]
pub enum ChainError {
    /// A link's initialize hook failed.
    #[error("link {link} failed to initialize: {message}")]
    Initialize {
        /// Link name.
        link: String,
        /// Failure detail.
        message: String,
    },

    /// A link's parameters failed validation before processing.
    #[error("link {link} failed to validate params: {message}")]
    InvalidParams {
        /// Link name.
        link: String,
        /// Failure detail.
        message: String,
    },

    /// A link's complete hook failed.
    #[error("failed to complete link: {message}")]
    Complete {
        /// Failure detail.
        message: String,
    },

    /// A processing or conversion error killed the chain under the active
    /// strictness.
    #[error("link encountered error, killing chain due to strictness ({strictness}): {message}")]
    Killed {
        /// Strictness in effect when the chain was killed.
        strictness: String,
        /// The wrapped link error.
        message: String,
    },

    /// A value was sent after the chain was closed.
    #[error("chain is closed")]
    Closed,

    /// A value was sent while the chain was already in an error state.
    #[error("chain is in error state: {0}")]
    ErrorState(Box<ChainError>),

    /// A link already claimed by another chain was reused.
    #[error("link {0} is in-use by another chain")]
    LinkInUse(String),

    /// Adding links directly to a multi-chain is unsupported.
    #[error("with_added_links is not supported on MultiChain")]
    AddedLinksUnsupported,

    /// A registry failure surfaced at the chain level.
    #[error("{0}")]
    Param(#[from] ParamError),

    /// Anything else, including module orchestration failures.
    #[error("{0}")]
    Other(String),
}

impl ChainError {
    /// Creates a freeform chain error.
    #[must_use]
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapt_error_debug_classification() {
        assert!(AdaptError::Absent("nil".into()).is_debug());
        assert!(!AdaptError::incompatible("String", "i64").is_debug());
    }

    #[test]
    fn adapt_error_reason_formatting() {
        let plain = AdaptError::incompatible("A", "B");
        assert_eq!(plain.to_string(), "cannot adapt \"A\" to \"B\"");

        let detailed = AdaptError::incompatible_because("A", "B", "missing field `x`");
        assert!(detailed.to_string().ends_with("missing field `x`"));
    }

    #[test]
    fn link_error_prefixes_process() {
        let err = LinkError::process("boom");
        assert_eq!(err.to_string(), "process error: boom");
    }

    #[test]
    fn param_error_messages_are_stable() {
        let err = ParamError::Required("required".into());
        assert_eq!(err.to_string(), "parameter \"required\" is required");

        let err = ParamError::TypeMismatch {
            name: "optional".into(),
            expected: "string".into(),
            actual: "int".into(),
        };
        assert_eq!(
            err.to_string(),
            "parameter \"optional\" expects type \"string\", but argument value is type \"int\""
        );
    }

    #[test]
    fn chain_error_wraps_inner() {
        let inner = ChainError::Closed;
        let err = ChainError::ErrorState(Box::new(inner));
        assert_eq!(err.to_string(), "chain is in error state: chain is closed");
    }
}
