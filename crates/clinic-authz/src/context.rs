//! Caller identity and clinic membership types.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// =============================================================================
// Subject
// =============================================================================

/// The authenticated caller of a request.
///
/// Constructed by the authentication layer and attached to the request
/// before authorization runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    /// Opaque caller id (user id or service name).
    pub id: String,

    /// Whether the caller is an internal trusted service.
    #[serde(default)]
    pub is_service_principal: bool,
}

impl Subject {
    /// Creates a subject for an end user.
    #[must_use]
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_service_principal: false,
        }
    }

    /// Creates a subject for an internal service.
    #[must_use]
    pub fn service(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_service_principal: true,
        }
    }
}

// =============================================================================
// Clinician Roles
// =============================================================================

/// Role a clinician holds within one clinic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ClinicianRole {
    #[serde(rename = "CLINIC_ADMIN")]
    ClinicAdmin,
    #[serde(rename = "CLINIC_MEMBER")]
    ClinicMember,
}

impl ClinicianRole {
    /// Stored name of the role.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClinicAdmin => "CLINIC_ADMIN",
            Self::ClinicMember => "CLINIC_MEMBER",
        }
    }
}

impl fmt::Display for ClinicianRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored role string that does not name a known role.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown clinician role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for ClinicianRole {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CLINIC_ADMIN" => Ok(Self::ClinicAdmin),
            "CLINIC_MEMBER" => Ok(Self::ClinicMember),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

// =============================================================================
// Clinician Context
// =============================================================================

/// Roles a subject holds within a specific clinic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClinicianContext {
    /// Recognized roles.
    pub roles: BTreeSet<ClinicianRole>,
}

impl ClinicianContext {
    /// Creates a context from known roles.
    #[must_use]
    pub fn new(roles: impl IntoIterator<Item = ClinicianRole>) -> Self {
        Self {
            roles: roles.into_iter().collect(),
        }
    }

    /// Maps stored role strings onto the closed role set.
    ///
    /// Unrecognized strings are dropped so they can never satisfy a rule.
    #[must_use]
    pub fn from_stored_roles<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut known = BTreeSet::new();
        for role in roles {
            match role.as_ref().parse::<ClinicianRole>() {
                Ok(role) => {
                    known.insert(role);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring unrecognized clinician role");
                }
            }
        }
        Self { roles: known }
    }

    /// Returns `true` if the role is present.
    #[must_use]
    pub fn has_role(&self, role: ClinicianRole) -> bool {
        self.roles.contains(&role)
    }

    /// Returns `true` if no role is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}
