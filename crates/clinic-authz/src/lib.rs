//! # clinic-authz
//!
//! Authorization decision engine for the clinic service.
//!
//! Every inbound call is decided before business logic runs: given the
//! caller's [`Subject`], the request method and path, and (when a rule needs
//! it) the caller's role in the target clinic, the engine answers Allow,
//! Deny or InternalError.
//!
//! ## Modules
//!
//! - [`request`] - Request normalization
//! - [`rules`] - Declarative rule source and path patterns
//! - [`compiler`] - Rule validation and indexing
//! - [`context`] - Caller identity and clinician roles
//! - [`resolver`] - Clinic membership lookup
//! - [`evaluator`] - Decision evaluation
//! - [`middleware`] - Axum authorization gate
//! - [`config`] - Engine configuration
//! - [`error`] - Error types

pub mod compiler;
pub mod config;
pub mod context;
pub mod error;
pub mod evaluator;
pub mod middleware;
pub mod request;
pub mod resolver;
pub mod rules;

pub use compiler::{CLINIC_POLICY, CompiledPolicy, CompiledPredicate, CompiledRule};
pub use config::{AuthzConfig, ConfigError};
pub use context::{ClinicianContext, ClinicianRole, Subject, UnknownRole};
pub use error::{CompileError, ResolverError};
pub use evaluator::{DEFAULT_RESOLVER_TIMEOUT, Decision, Outcome, PolicyEvaluator};
pub use middleware::{AuthorizationState, authorization_middleware};
pub use request::{Method, RequestDescriptor, UnsupportedMethod};
pub use resolver::{ClinicianContextResolver, StaticClinicianResolver};
pub use rules::{PathPattern, Predicate, RoleRequirement, RuleDefinition, RuleSource, Segment};
