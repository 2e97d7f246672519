//! Declarative rule source.
//!
//! Rules are written in TOML, one `[[rule]]` table each:
//!
//! ```toml
//! [[rule]]
//! path = "/v1/clinics/{clinicId}/patients/{patientId}"
//! methods = ["DELETE"]
//! allow = { any = [{ owner = "patientId" }, { clinic_role = "admin" }] }
//! ```
//!
//! The types here mirror the file one-to-one; validation and indexing happen
//! in [`crate::compiler`].

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::CompileError;

/// Path parameter that clinic-role predicates read the clinic id from.
pub const CLINIC_ID_PARAM: &str = "clinicId";

// =============================================================================
// Rule Source
// =============================================================================

/// A parsed rule file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSource {
    /// Rules in declaration order. Order carries no meaning.
    #[serde(rename = "rule", default)]
    pub rules: Vec<RuleDefinition>,
}

impl RuleSource {
    /// Parses a TOML rule file.
    pub fn from_toml(source: &str) -> Result<Self, CompileError> {
        toml::from_str(source).map_err(|e| CompileError::invalid_source(e.to_string()))
    }

    /// Appends a rule.
    #[must_use]
    pub fn with_rule(mut self, rule: RuleDefinition) -> Self {
        self.rules.push(rule);
        self
    }
}

/// One grant: a path pattern, the methods it covers, and the condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleDefinition {
    /// Path pattern, e.g. `/v1/clinics/{clinicId}`.
    pub path: String,

    /// Methods the rule grants.
    pub methods: Vec<String>,

    /// Condition under which access is granted.
    pub allow: Predicate,
}

impl RuleDefinition {
    /// Creates a rule definition.
    #[must_use]
    pub fn new<I, S>(path: impl Into<String>, methods: I, allow: Predicate) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path: path.into(),
            methods: methods.into_iter().map(Into::into).collect(),
            allow,
        }
    }
}

// =============================================================================
// Predicates
// =============================================================================

/// Grant condition as written in the rule source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    /// Caller is a service principal named in this allow-list.
    Service(BTreeSet<String>),
    /// Caller id equals the value captured by the named parameter.
    Owner(String),
    /// Caller holds the required role in the clinic captured by `{clinicId}`.
    ClinicRole(RoleRequirement),
    /// Any authenticated caller that is not a service principal.
    /// Only `true` is meaningful.
    User(bool),
    /// At least one nested predicate holds.
    Any(Vec<Predicate>),
    /// Every nested predicate holds.
    All(Vec<Predicate>),
}

impl Predicate {
    /// Service allow-list predicate.
    #[must_use]
    pub fn service<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Service(names.into_iter().map(Into::into).collect())
    }

    /// Self-ownership predicate.
    #[must_use]
    pub fn owner(parameter: impl Into<String>) -> Self {
        Self::Owner(parameter.into())
    }

    /// Clinic role predicate.
    #[must_use]
    pub fn clinic_role(requirement: RoleRequirement) -> Self {
        Self::ClinicRole(requirement)
    }

    /// Disjunction.
    #[must_use]
    pub fn any(predicates: impl IntoIterator<Item = Predicate>) -> Self {
        Self::Any(predicates.into_iter().collect())
    }

    /// Conjunction.
    #[must_use]
    pub fn all(predicates: impl IntoIterator<Item = Predicate>) -> Self {
        Self::All(predicates.into_iter().collect())
    }
}

/// Role a clinic-role predicate requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleRequirement {
    /// `CLINIC_ADMIN` must be present.
    Admin,
    /// `CLINIC_MEMBER` must be present.
    Member,
    /// Any role at all.
    Any,
}

// =============================================================================
// Path Patterns
// =============================================================================

/// One segment of a path pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// Must equal the request segment exactly.
    Literal(String),
    /// Matches any segment and captures it under this name.
    Param(String),
}

/// A parsed path pattern such as `/v1/clinics/{clinicId}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    /// Parses a pattern.
    ///
    /// Rules: must start with `/`, contain at least one segment, no empty
    /// segments, and parameters must be a whole segment of the form
    /// `{name}` with a unique alphanumeric/underscore name.
    pub fn parse(raw: &str) -> Result<Self, CompileError> {
        let malformed = |msg: &str| CompileError::malformed_pattern(raw, msg);

        let Some(rest) = raw.strip_prefix('/') else {
            return Err(malformed("must start with '/'"));
        };
        if rest.is_empty() {
            return Err(malformed("must contain at least one segment"));
        }
        let rest = rest.strip_suffix('/').unwrap_or(rest);

        let mut segments = Vec::new();
        let mut names = HashSet::new();
        for part in rest.split('/') {
            if part.is_empty() {
                return Err(malformed("empty segment"));
            }
            if let Some(inner) = part.strip_prefix('{') {
                let Some(name) = inner.strip_suffix('}') else {
                    return Err(malformed("unterminated parameter"));
                };
                if !is_valid_param_name(name) {
                    return Err(malformed(&format!("invalid parameter name '{name}'")));
                }
                if !names.insert(name) {
                    return Err(malformed(&format!("duplicate parameter '{name}'")));
                }
                segments.push(Segment::Param(name.to_string()));
            } else if part.contains('{') || part.contains('}') {
                return Err(malformed(&format!(
                    "parameter must span the whole segment: '{part}'"
                )));
            } else {
                segments.push(Segment::Literal(part.to_string()));
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// The pattern as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Parsed segments.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Number of segments a matching request must have.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Patterns always have at least one segment.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Position of a named parameter.
    #[must_use]
    pub fn position_of(&self, name: &str) -> Option<usize> {
        self.segments
            .iter()
            .position(|s| matches!(s, Segment::Param(p) if p == name))
    }
}

fn is_valid_param_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
