//! Clinician context lookup.
//!
//! The evaluator asks a [`ClinicianContextResolver`] for the subject's roles
//! in a clinic only when a matched rule depends on them. Results are never
//! cached across requests: a demoted admin must lose access on the very next
//! call.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::context::{ClinicianContext, ClinicianRole};
use crate::error::ResolverError;

/// Source of clinic membership.
///
/// `Ok(None)` means the subject is not a clinician of the clinic, which is a
/// normal outcome. `Err` means the membership store could not answer.
#[async_trait]
pub trait ClinicianContextResolver: Send + Sync {
    /// Returns the subject's roles in the clinic, if any.
    async fn resolve(
        &self,
        subject_id: &str,
        clinic_id: &str,
    ) -> Result<Option<ClinicianContext>, ResolverError>;
}

/// In-memory membership table.
///
/// Writes are visible to the next lookup. Useful for tests and local runs.
#[derive(Debug, Default)]
pub struct StaticClinicianResolver {
    memberships: DashMap<(String, String), ClinicianContext>,
}

impl StaticClinicianResolver {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a membership, builder style.
    #[must_use]
    pub fn with_clinician(
        self,
        clinic_id: impl Into<String>,
        subject_id: impl Into<String>,
        roles: impl IntoIterator<Item = ClinicianRole>,
    ) -> Self {
        self.set_roles(clinic_id, subject_id, roles);
        self
    }

    /// Sets or replaces a subject's roles in a clinic.
    pub fn set_roles(
        &self,
        clinic_id: impl Into<String>,
        subject_id: impl Into<String>,
        roles: impl IntoIterator<Item = ClinicianRole>,
    ) {
        self.memberships.insert(
            (clinic_id.into(), subject_id.into()),
            ClinicianContext::new(roles),
        );
    }

    /// Removes a subject from a clinic.
    pub fn remove(&self, clinic_id: &str, subject_id: &str) {
        self.memberships
            .remove(&(clinic_id.to_string(), subject_id.to_string()));
    }
}

#[async_trait]
impl ClinicianContextResolver for StaticClinicianResolver {
    async fn resolve(
        &self,
        subject_id: &str,
        clinic_id: &str,
    ) -> Result<Option<ClinicianContext>, ResolverError> {
        Ok(self
            .memberships
            .get(&(clinic_id.to_string(), subject_id.to_string()))
            .map(|entry| entry.value().clone()))
    }
}
