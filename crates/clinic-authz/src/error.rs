//! Error types for rule compilation and clinician lookups.
//!
//! Compilation errors are fatal at startup. Resolver errors abort a single
//! evaluation with an internal-error decision; they are never turned into a
//! deny.

/// Errors raised while compiling a rule source into a [`CompiledPolicy`].
///
/// [`CompiledPolicy`]: crate::compiler::CompiledPolicy
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    /// The rule source could not be parsed.
    #[error("Invalid rule source: {message}")]
    InvalidSource {
        /// Parser diagnostic.
        message: String,
    },

    /// A path pattern is syntactically invalid.
    #[error("Malformed pattern '{pattern}': {message}")]
    MalformedPattern {
        /// The offending pattern as written in the source.
        pattern: String,
        /// What is wrong with it.
        message: String,
    },

    /// A rule lists an unsupported HTTP method or none at all.
    #[error("Invalid methods for '{pattern}': {message}")]
    InvalidMethods {
        /// Pattern of the rule.
        pattern: String,
        /// What is wrong with the method list.
        message: String,
    },

    /// A predicate is empty or otherwise unusable.
    #[error("Invalid predicate for '{pattern}': {message}")]
    InvalidPredicate {
        /// Pattern of the rule.
        pattern: String,
        /// What is wrong with the predicate.
        message: String,
    },

    /// A predicate references a parameter the pattern does not capture.
    #[error("Rule '{pattern}' references undefined path parameter '{parameter}'")]
    UndefinedParameter {
        /// Pattern of the rule.
        pattern: String,
        /// The missing parameter name.
        parameter: String,
    },

    /// Two rules share method, path shape and predicate.
    #[error("Duplicate rule: {method} '{pattern}' is identical to '{existing}'")]
    DuplicateRule {
        /// The method both rules grant.
        method: String,
        /// Pattern of the rule being compiled.
        pattern: String,
        /// Pattern of the rule compiled earlier.
        existing: String,
    },
}

impl CompileError {
    /// Creates a new `InvalidSource` error.
    #[must_use]
    pub fn invalid_source(message: impl Into<String>) -> Self {
        Self::InvalidSource {
            message: message.into(),
        }
    }

    /// Creates a new `MalformedPattern` error.
    #[must_use]
    pub fn malformed_pattern(pattern: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedPattern {
            pattern: pattern.into(),
            message: message.into(),
        }
    }

    /// Creates a new `InvalidMethods` error.
    #[must_use]
    pub fn invalid_methods(pattern: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidMethods {
            pattern: pattern.into(),
            message: message.into(),
        }
    }

    /// Creates a new `InvalidPredicate` error.
    #[must_use]
    pub fn invalid_predicate(pattern: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidPredicate {
            pattern: pattern.into(),
            message: message.into(),
        }
    }

    /// Creates a new `UndefinedParameter` error.
    #[must_use]
    pub fn undefined_parameter(pattern: impl Into<String>, parameter: impl Into<String>) -> Self {
        Self::UndefinedParameter {
            pattern: pattern.into(),
            parameter: parameter.into(),
        }
    }
}

/// Errors returned by a [`ClinicianContextResolver`].
///
/// "No clinician record" is not an error; resolvers report it as `Ok(None)`.
///
/// [`ClinicianContextResolver`]: crate::resolver::ClinicianContextResolver
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolverError {
    /// The membership store could not be reached or answered with a failure.
    #[error("Clinician lookup failed: {message}")]
    Transport {
        /// Description of the failure.
        message: String,
    },

    /// The membership store answered with something that is not a clinician record.
    #[error("Invalid clinician record: {message}")]
    InvalidResponse {
        /// Description of the failure.
        message: String,
    },

    /// The lookup did not finish within the configured timeout.
    #[error("Clinician lookup timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// The inbound request was cancelled while the lookup was pending.
    #[error("Clinician lookup cancelled")]
    Cancelled,
}

impl ResolverError {
    /// Creates a new `Transport` error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidResponse` error.
    #[must_use]
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }
}
