//! Clinician lookups against the clinic membership service.
//!
//! `GET {base_url}/v1/clinics/{clinicId}/clinicians/{subjectId}`
//!
//! | Response             | Result                          |
//! |----------------------|---------------------------------|
//! | 200 `{"roles": []}`  | `Ok(Some(context))`             |
//! | 404                  | `Ok(None)`                      |
//! | other status         | `Err(ResolverError::InvalidResponse)` |
//! | network failure      | `Err(ResolverError::Transport)` |
//!
//! Results are never cached; every evaluation sees current membership.

use std::time::Duration;

use async_trait::async_trait;
use clinic_authz::{ClinicianContext, ClinicianContextResolver, ResolverError};
use reqwest::StatusCode;
use serde::Deserialize;
use url::Url;

#[derive(Debug, Deserialize)]
struct MembershipResponse {
    #[serde(default)]
    roles: Vec<String>,
}

/// Resolver backed by the membership service's HTTP API.
pub struct HttpClinicianResolver {
    http_client: reqwest::Client,
    base_url: Url,
}

impl HttpClinicianResolver {
    /// Creates a resolver for `base_url`.
    ///
    /// `request_timeout` bounds each call on the client itself, independent of
    /// the evaluator's resolver timeout.
    pub fn new(base_url: Url, request_timeout: Duration) -> Result<Self, ResolverError> {
        if base_url.cannot_be_a_base() {
            return Err(ResolverError::transport(format!(
                "membership base URL cannot carry a path: {base_url}"
            )));
        }
        let http_client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ResolverError::transport(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url,
        })
    }

    /// The membership URL for one clinician. Ids are percent-encoded as
    /// single path segments.
    fn endpoint(&self, clinic_id: &str, subject_id: &str) -> Result<Url, ResolverError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ResolverError::transport("membership base URL cannot carry a path"))?
            .pop_if_empty()
            .extend(["v1", "clinics", clinic_id, "clinicians", subject_id]);
        Ok(url)
    }
}

#[async_trait]
impl ClinicianContextResolver for HttpClinicianResolver {
    async fn resolve(
        &self,
        subject_id: &str,
        clinic_id: &str,
    ) -> Result<Option<ClinicianContext>, ResolverError> {
        let url = self.endpoint(clinic_id, subject_id)?;

        let response = self
            .http_client
            .get(url.as_str())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(clinic_id, subject_id, error = %e, "Membership lookup failed");
                ResolverError::transport(e.to_string())
            })?;

        match response.status() {
            StatusCode::OK => {
                let body: MembershipResponse = response.json().await.map_err(|e| {
                    tracing::warn!(clinic_id, subject_id, error = %e, "Unreadable membership response");
                    ResolverError::invalid_response(e.to_string())
                })?;
                Ok(Some(ClinicianContext::from_stored_roles(body.roles)))
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(ResolverError::invalid_response(format!(
                "membership service returned {status}"
            ))),
        }
    }
}
