//! Decision evaluator.
//!
//! Matches a [`RequestDescriptor`] and [`Subject`] against a
//! [`CompiledPolicy`] and produces a [`Decision`].
//!
//! # Evaluation Order
//!
//! 1. Select rules sharing the request's method and segment count, and keep
//!    those whose literal segments match.
//! 2. Evaluate every matched rule with clinician roles still unknown. Service
//!    and ownership checks are plain comparisons, so a request they grant
//!    never reaches the membership store.
//! 3. For rules that still depend on roles, resolve the subject's clinician
//!    context (once per clinic) and evaluate again.
//! 4. Allow on the first true rule; otherwise Deny.
//!
//! A resolver failure, timeout or cancellation ends evaluation with
//! [`Outcome::InternalError`]. It is never reported as a deny.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use clinic_authz::{CompiledPolicy, PolicyEvaluator, RequestDescriptor, Subject};
//!
//! let evaluator = PolicyEvaluator::new(Arc::new(CompiledPolicy::clinic()?), resolver);
//! let request = RequestDescriptor::normalize("GET", "/v1/clinics")?;
//! let decision = evaluator.decide(&request, &Subject::service("hydrophone")).await;
//! assert!(decision.is_allowed());
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::compiler::{CompiledPolicy, CompiledPredicate, CompiledRule};
use crate::config::AuthzConfig;
use crate::context::{ClinicianContext, ClinicianRole, Subject};
use crate::error::{CompileError, ResolverError};
use crate::request::RequestDescriptor;
use crate::resolver::ClinicianContextResolver;
use crate::rules::RoleRequirement;

// =============================================================================
// Decision
// =============================================================================

/// Outcome of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// A rule granted access.
    Allow,
    /// No rule granted access.
    Deny,
    /// The decision could not be made.
    InternalError,
}

/// Result of evaluating a request.
///
/// `reason` is meant for logs. Callers that are denied must not see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// The outcome.
    pub outcome: Outcome,
    /// Diagnostic detail.
    pub reason: Option<String>,
}

impl Decision {
    /// Access granted.
    #[must_use]
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Allow,
            reason: Some(reason.into()),
        }
    }

    /// Access denied.
    #[must_use]
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Deny,
            reason: Some(reason.into()),
        }
    }

    /// Evaluation aborted.
    #[must_use]
    pub fn internal_error(reason: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::InternalError,
            reason: Some(reason.into()),
        }
    }

    /// Returns `true` if access was granted.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        self.outcome == Outcome::Allow
    }

    /// Returns `true` if access was denied.
    #[must_use]
    pub fn is_denied(&self) -> bool {
        self.outcome == Outcome::Deny
    }

    /// Returns `true` if evaluation failed.
    #[must_use]
    pub fn is_internal_error(&self) -> bool {
        self.outcome == Outcome::InternalError
    }
}

// =============================================================================
// Three-valued predicate logic
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Truth {
    True,
    False,
    /// Depends on clinician roles not yet resolved.
    Unknown,
}

impl From<bool> for Truth {
    fn from(value: bool) -> Self {
        if value { Self::True } else { Self::False }
    }
}

/// Clinician contexts resolved during one evaluation, keyed by clinic id.
type ResolvedRoles = HashMap<String, Option<ClinicianContext>>;

fn evaluate(
    predicate: &CompiledPredicate,
    subject: &Subject,
    segments: &[String],
    roles: &ResolvedRoles,
) -> Truth {
    match predicate {
        CompiledPredicate::Service(names) => {
            Truth::from(subject.is_service_principal && names.contains(&subject.id))
        }
        CompiledPredicate::Owner { position } => {
            Truth::from(segments.get(*position).is_some_and(|v| *v == subject.id))
        }
        CompiledPredicate::User => Truth::from(!subject.is_service_principal),
        CompiledPredicate::ClinicRole {
            requirement,
            position,
        } => {
            let Some(clinic_id) = segments.get(*position) else {
                return Truth::False;
            };
            match roles.get(clinic_id) {
                None => Truth::Unknown,
                Some(ctx) => Truth::from(satisfies(*requirement, ctx.as_ref())),
            }
        }
        CompiledPredicate::Any(predicates) => {
            let mut unknown = false;
            for p in predicates {
                match evaluate(p, subject, segments, roles) {
                    Truth::True => return Truth::True,
                    Truth::Unknown => unknown = true,
                    Truth::False => {}
                }
            }
            if unknown { Truth::Unknown } else { Truth::False }
        }
        CompiledPredicate::All(predicates) => {
            let mut unknown = false;
            for p in predicates {
                match evaluate(p, subject, segments, roles) {
                    Truth::False => return Truth::False,
                    Truth::Unknown => unknown = true,
                    Truth::True => {}
                }
            }
            if unknown { Truth::Unknown } else { Truth::True }
        }
    }
}

fn satisfies(requirement: RoleRequirement, ctx: Option<&ClinicianContext>) -> bool {
    let Some(ctx) = ctx else {
        return false;
    };
    match requirement {
        RoleRequirement::Admin => ctx.has_role(ClinicianRole::ClinicAdmin),
        RoleRequirement::Member => ctx.has_role(ClinicianRole::ClinicMember),
        RoleRequirement::Any => !ctx.is_empty(),
    }
}

/// Clinic ids a predicate reads roles for.
fn clinic_ids<'a>(predicate: &CompiledPredicate, segments: &'a [String], out: &mut Vec<&'a str>) {
    match predicate {
        CompiledPredicate::ClinicRole { position, .. } => {
            if let Some(id) = segments.get(*position)
                && !out.contains(&id.as_str())
            {
                out.push(id.as_str());
            }
        }
        CompiledPredicate::Any(ps) | CompiledPredicate::All(ps) => {
            for p in ps {
                clinic_ids(p, segments, out);
            }
        }
        CompiledPredicate::Service(_) | CompiledPredicate::Owner { .. } | CompiledPredicate::User => {}
    }
}

// =============================================================================
// Policy Evaluator
// =============================================================================

/// Default bound on a clinician lookup.
pub const DEFAULT_RESOLVER_TIMEOUT: Duration = Duration::from_secs(2);

/// Authorization decision engine.
///
/// Holds the compiled policy and the membership resolver; carries no
/// per-request state and can be shared freely across tasks.
#[derive(Clone)]
pub struct PolicyEvaluator {
    policy: Arc<CompiledPolicy>,
    resolver: Arc<dyn ClinicianContextResolver>,
    resolver_timeout: Duration,
}

impl PolicyEvaluator {
    /// Creates an evaluator with the default resolver timeout.
    #[must_use]
    pub fn new(policy: Arc<CompiledPolicy>, resolver: Arc<dyn ClinicianContextResolver>) -> Self {
        Self {
            policy,
            resolver,
            resolver_timeout: DEFAULT_RESOLVER_TIMEOUT,
        }
    }

    /// Compiles the configured policy and builds an evaluator from it.
    pub fn from_config(
        config: &AuthzConfig,
        resolver: Arc<dyn ClinicianContextResolver>,
    ) -> Result<Self, CompileError> {
        let policy = Arc::new(config.compile_policy()?);
        Ok(Self::new(policy, resolver).with_resolver_timeout(config.resolver_timeout))
    }

    /// Sets the bound on a single clinician lookup.
    #[must_use]
    pub fn with_resolver_timeout(mut self, timeout: Duration) -> Self {
        self.resolver_timeout = timeout;
        self
    }

    /// The compiled policy in use.
    #[must_use]
    pub fn policy(&self) -> &CompiledPolicy {
        &self.policy
    }

    /// Decides a raw method/path pair.
    ///
    /// Methods no rule can grant are denied.
    pub async fn decide_raw(&self, method: &str, path: &str, subject: &Subject) -> Decision {
        match RequestDescriptor::normalize(method, path) {
            Ok(request) => self.decide(&request, subject).await,
            Err(e) => {
                tracing::debug!(error = %e, subject = %subject.id, "Access denied");
                Decision::deny(e.to_string())
            }
        }
    }

    /// Decides a request.
    pub async fn decide(&self, request: &RequestDescriptor, subject: &Subject) -> Decision {
        self.decide_cancellable(request, subject, &CancellationToken::new())
            .await
    }

    /// Decides a request, aborting the clinician lookup when `cancel` fires.
    pub async fn decide_cancellable(
        &self,
        request: &RequestDescriptor,
        subject: &Subject,
        cancel: &CancellationToken,
    ) -> Decision {
        let candidates = self.policy.candidates(request);
        if candidates.is_empty() {
            tracing::debug!(request = %request, subject = %subject.id, "Access denied: no rule matches");
            return Decision::deny("no rule matches the request");
        }

        let mut roles = ResolvedRoles::new();

        // Step 1: everything that does not need the membership store
        let mut pending = Vec::new();
        for rule in candidates {
            match evaluate(&rule.predicate, subject, &request.segments, &roles) {
                Truth::True => return self.granted(request, subject, rule),
                Truth::Unknown => pending.push(rule),
                Truth::False => {}
            }
        }

        // Step 2: rules that depend on clinician roles
        for rule in pending {
            let mut needed = Vec::new();
            clinic_ids(&rule.predicate, &request.segments, &mut needed);

            for clinic_id in needed {
                if roles.contains_key(clinic_id) {
                    continue;
                }
                match self.lookup(subject, clinic_id, cancel).await {
                    Ok(ctx) => {
                        roles.insert(clinic_id.to_string(), ctx);
                    }
                    Err(e) => {
                        tracing::error!(
                            error = %e,
                            request = %request,
                            subject = %subject.id,
                            clinic_id = %clinic_id,
                            "Authorization aborted: clinician lookup failed"
                        );
                        return Decision::internal_error(e.to_string());
                    }
                }
            }

            if evaluate(&rule.predicate, subject, &request.segments, &roles) == Truth::True {
                return self.granted(request, subject, rule);
            }
        }

        tracing::debug!(request = %request, subject = %subject.id, "Access denied: no rule granted access");
        Decision::deny("no rule granted access")
    }

    fn granted(&self, request: &RequestDescriptor, subject: &Subject, rule: &CompiledRule) -> Decision {
        tracing::debug!(
            request = %request,
            subject = %subject.id,
            rule = %rule.pattern.as_str(),
            rule_index = rule.index,
            "Access granted"
        );
        Decision::allow(format!("granted by rule {}", rule.pattern.as_str()))
    }

    async fn lookup(
        &self,
        subject: &Subject,
        clinic_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<ClinicianContext>, ResolverError> {
        let timeout = self.resolver_timeout;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ResolverError::Cancelled),
            result = tokio::time::timeout(timeout, self.resolver.resolve(&subject.id, clinic_id)) => {
                result.unwrap_or_else(|_| {
                    Err(ResolverError::Timeout {
                        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    })
                })
            }
        }
    }
}
