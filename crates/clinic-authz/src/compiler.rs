//! Rule compilation and indexing.
//!
//! A [`RuleSource`] is validated and compiled once at startup into an
//! immutable [`CompiledPolicy`]. Rules are indexed by method, then by segment
//! count, then by a per-position trie of literal and wildcard segments, so a
//! request only ever visits rules that share its method and length.
//!
//! Any problem in the source is reported as a [`CompileError`]; there is no
//! partially loaded policy.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use crate::error::CompileError;
use crate::request::{Method, RequestDescriptor};
use crate::rules::{
    CLINIC_ID_PARAM, PathPattern, Predicate, RoleRequirement, RuleDefinition, RuleSource, Segment,
};

/// Rule table for the clinic service, embedded at build time.
pub const CLINIC_POLICY: &str = include_str!("../policy/clinic.toml");

// =============================================================================
// Compiled Predicates
// =============================================================================

/// Predicate with parameter names resolved to segment positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompiledPredicate {
    /// Service principal on the allow-list.
    Service(BTreeSet<String>),
    /// Caller id equals the request segment at `position`.
    Owner { position: usize },
    /// Caller holds `requirement` in the clinic at segment `position`.
    ClinicRole {
        requirement: RoleRequirement,
        position: usize,
    },
    /// Any non-service caller.
    User,
    /// Disjunction.
    Any(Vec<CompiledPredicate>),
    /// Conjunction.
    All(Vec<CompiledPredicate>),
}

impl CompiledPredicate {
    fn compile(predicate: &Predicate, pattern: &PathPattern) -> Result<Self, CompileError> {
        let raw = pattern.as_str();
        match predicate {
            Predicate::Service(names) => {
                if names.is_empty() || names.iter().any(|n| n.trim().is_empty()) {
                    return Err(CompileError::invalid_predicate(
                        raw,
                        "service allow-list must name at least one service",
                    ));
                }
                Ok(Self::Service(names.clone()))
            }
            Predicate::Owner(parameter) => pattern
                .position_of(parameter)
                .map(|position| Self::Owner { position })
                .ok_or_else(|| CompileError::undefined_parameter(raw, parameter)),
            Predicate::ClinicRole(requirement) => pattern
                .position_of(CLINIC_ID_PARAM)
                .map(|position| Self::ClinicRole {
                    requirement: *requirement,
                    position,
                })
                .ok_or_else(|| CompileError::undefined_parameter(raw, CLINIC_ID_PARAM)),
            Predicate::User(true) => Ok(Self::User),
            Predicate::User(false) => Err(CompileError::invalid_predicate(
                raw,
                "'user' only accepts true",
            )),
            Predicate::Any(ps) | Predicate::All(ps) => {
                if ps.is_empty() {
                    return Err(CompileError::invalid_predicate(
                        raw,
                        "'any'/'all' need at least one predicate",
                    ));
                }
                let compiled = ps
                    .iter()
                    .map(|p| Self::compile(p, pattern))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(if matches!(predicate, Predicate::Any(_)) {
                    Self::Any(compiled)
                } else {
                    Self::All(compiled)
                })
            }
        }
    }
}

// =============================================================================
// Compiled Rules
// =============================================================================

/// A validated rule.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    /// Index in the source, used in logs.
    pub index: usize,
    /// Path pattern.
    pub pattern: PathPattern,
    /// Methods the rule grants.
    pub methods: BTreeSet<Method>,
    /// Grant condition.
    pub predicate: CompiledPredicate,
}

impl CompiledRule {
    fn compile(index: usize, def: &RuleDefinition) -> Result<Self, CompileError> {
        let pattern = PathPattern::parse(&def.path)?;

        if def.methods.is_empty() {
            return Err(CompileError::invalid_methods(
                &def.path,
                "at least one method is required",
            ));
        }
        let mut methods = BTreeSet::new();
        for m in &def.methods {
            let method: Method = m
                .parse()
                .map_err(|e: crate::request::UnsupportedMethod| {
                    CompileError::invalid_methods(&def.path, e.to_string())
                })?;
            if !methods.insert(method) {
                return Err(CompileError::invalid_methods(
                    &def.path,
                    format!("method {method} listed twice"),
                ));
            }
        }

        let predicate = CompiledPredicate::compile(&def.allow, &pattern)?;

        Ok(Self {
            index,
            pattern,
            methods,
            predicate,
        })
    }
}

// =============================================================================
// Segment Trie
// =============================================================================

/// One level of the per-(method, length) index.
#[derive(Debug, Default)]
struct SegmentNode {
    literals: HashMap<String, SegmentNode>,
    wildcard: Option<Box<SegmentNode>>,
    /// Rules whose pattern ends at this node.
    rules: Vec<usize>,
}

impl SegmentNode {
    fn leaf_for(&mut self, pattern: &PathPattern) -> &mut SegmentNode {
        let mut node = self;
        for segment in pattern.segments() {
            node = match segment {
                Segment::Literal(text) => node.literals.entry(text.clone()).or_default(),
                Segment::Param(_) => node.wildcard.get_or_insert_with(Default::default),
            };
        }
        node
    }

    fn collect(&self, segments: &[String], out: &mut Vec<usize>) {
        let Some((head, tail)) = segments.split_first() else {
            out.extend_from_slice(&self.rules);
            return;
        };
        if let Some(child) = self.literals.get(head) {
            child.collect(tail, out);
        }
        if let Some(child) = &self.wildcard {
            child.collect(tail, out);
        }
    }
}

// =============================================================================
// Compiled Policy
// =============================================================================

/// Immutable, indexed rule set shared by all evaluations.
#[derive(Debug)]
pub struct CompiledPolicy {
    rules: Vec<CompiledRule>,
    /// Indexed by [`Method::index`], then by segment count.
    index: [HashMap<usize, SegmentNode>; Method::ALL.len()],
}

impl CompiledPolicy {
    /// Compiles a rule source.
    pub fn compile(source: &RuleSource) -> Result<Self, CompileError> {
        let mut policy = Self {
            rules: Vec::with_capacity(source.rules.len()),
            index: Default::default(),
        };

        for (i, def) in source.rules.iter().enumerate() {
            let rule = CompiledRule::compile(i, def)?;

            for method in &rule.methods {
                let leaf = policy.index[method.index()]
                    .entry(rule.pattern.len())
                    .or_default()
                    .leaf_for(&rule.pattern);

                if let Some(&existing) = leaf
                    .rules
                    .iter()
                    .find(|&&r| policy.rules[r].predicate == rule.predicate)
                {
                    return Err(CompileError::DuplicateRule {
                        method: method.to_string(),
                        pattern: rule.pattern.as_str().to_string(),
                        existing: policy.rules[existing].pattern.as_str().to_string(),
                    });
                }
                leaf.rules.push(policy.rules.len());
            }
            policy.rules.push(rule);
        }

        tracing::debug!(rules = policy.rules.len(), "Compiled access rules");
        Ok(policy)
    }

    /// Parses and compiles a TOML rule source.
    pub fn from_toml(source: &str) -> Result<Self, CompileError> {
        Self::compile(&RuleSource::from_toml(source)?)
    }

    /// Reads and compiles a rule file.
    pub fn from_file(path: &Path) -> Result<Self, CompileError> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            CompileError::invalid_source(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&source)
    }

    /// Compiles the embedded clinic service rule table.
    pub fn clinic() -> Result<Self, CompileError> {
        Self::from_toml(CLINIC_POLICY)
    }

    /// Rules that structurally match the request.
    #[must_use]
    pub fn candidates(&self, request: &RequestDescriptor) -> Vec<&CompiledRule> {
        let mut ids = Vec::new();
        if let Some(root) = self.index[request.method.index()].get(&request.len()) {
            root.collect(&request.segments, &mut ids);
        }
        ids.into_iter().map(|i| &self.rules[i]).collect()
    }

    /// All compiled rules.
    #[must_use]
    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    /// Number of compiled rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns `true` if the policy grants nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(rules: Vec<RuleDefinition>) -> RuleSource {
        RuleSource { rules }
    }

    #[test]
    fn test_clinic_policy_compiles() {
        let policy = CompiledPolicy::clinic().unwrap();
        assert!(!policy.is_empty());
    }

    #[test]
    fn test_candidates_by_method_and_length() {
        let policy = CompiledPolicy::compile(&source(vec![
            RuleDefinition::new("/v1/clinics", ["GET"], Predicate::service(["orca"])),
            RuleDefinition::new("/v1/clinics/{clinicId}", ["GET"], Predicate::service(["orca"])),
            RuleDefinition::new("/v1/clinics/{clinicId}", ["PUT"], Predicate::service(["orca"])),
        ]))
        .unwrap();

        let req = RequestDescriptor::normalize("GET", "/v1/clinics/c1").unwrap();
        let found = policy.candidates(&req);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].index, 1);

        let req = RequestDescriptor::normalize("DELETE", "/v1/clinics/c1").unwrap();
        assert!(policy.candidates(&req).is_empty());

        let req = RequestDescriptor::normalize("GET", "/v1/clinics/c1/patients").unwrap();
        assert!(policy.candidates(&req).is_empty());
    }

    #[test]
    fn test_literal_and_wildcard_both_match() {
        let policy = CompiledPolicy::compile(&source(vec![
            RuleDefinition::new(
                "/v1/clinics/share_code/{shareCode}",
                ["GET"],
                Predicate::User(true),
            ),
            RuleDefinition::new(
                "/v1/clinics/{clinicId}/{section}",
                ["GET"],
                Predicate::service(["orca"]),
            ),
        ]))
        .unwrap();

        let req = RequestDescriptor::normalize("GET", "/v1/clinics/share_code/ABCD").unwrap();
        let mut found: Vec<_> = policy.candidates(&req).iter().map(|r| r.index).collect();
        found.sort_unstable();
        assert_eq!(found, vec![0, 1]);
    }

    #[test]
    fn test_literals_are_case_sensitive() {
        let policy = CompiledPolicy::compile(&source(vec![RuleDefinition::new(
            "/v1/clinics",
            ["GET"],
            Predicate::service(["orca"]),
        )]))
        .unwrap();

        let req = RequestDescriptor::normalize("GET", "/v1/Clinics").unwrap();
        assert!(policy.candidates(&req).is_empty());
    }

    #[test]
    fn test_undefined_owner_parameter() {
        let err = CompiledPolicy::compile(&source(vec![RuleDefinition::new(
            "/v1/clinics/{clinicId}",
            ["GET"],
            Predicate::owner("patientId"),
        )]))
        .unwrap_err();
        assert_eq!(
            err,
            CompileError::undefined_parameter("/v1/clinics/{clinicId}", "patientId")
        );
    }

    #[test]
    fn test_clinic_role_requires_clinic_id() {
        let err = CompiledPolicy::compile(&source(vec![RuleDefinition::new(
            "/v1/patients/{patientId}/clinics",
            ["GET"],
            Predicate::clinic_role(RoleRequirement::Any),
        )]))
        .unwrap_err();
        assert!(matches!(
            err,
            CompileError::UndefinedParameter { ref parameter, .. } if parameter == "clinicId"
        ));
    }

    #[test]
    fn test_nested_undefined_parameter() {
        let err = CompiledPolicy::compile(&source(vec![RuleDefinition::new(
            "/v1/clinics/{clinicId}",
            ["GET"],
            Predicate::any([
                Predicate::service(["orca"]),
                Predicate::all([Predicate::owner("userId")]),
            ]),
        )]))
        .unwrap_err();
        assert!(matches!(err, CompileError::UndefinedParameter { .. }));
    }

    #[test]
    fn test_invalid_methods() {
        for methods in [vec![], vec!["OPTIONS"], vec!["GET", "get"]] {
            let err = CompiledPolicy::compile(&source(vec![RuleDefinition::new(
                "/v1/clinics",
                methods.clone(),
                Predicate::User(true),
            )]))
            .unwrap_err();
            assert!(
                matches!(err, CompileError::InvalidMethods { .. }),
                "{methods:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_invalid_predicates() {
        for predicate in [
            Predicate::Service(BTreeSet::new()),
            Predicate::service([" "]),
            Predicate::User(false),
            Predicate::Any(vec![]),
            Predicate::All(vec![]),
        ] {
            let err = CompiledPolicy::compile(&source(vec![RuleDefinition::new(
                "/v1/clinics",
                ["GET"],
                predicate,
            )]))
            .unwrap_err();
            assert!(matches!(err, CompileError::InvalidPredicate { .. }));
        }
    }

    #[test]
    fn test_malformed_pattern_fails_compilation() {
        let err = CompiledPolicy::compile(&source(vec![RuleDefinition::new(
            "/v1/clinics/{clinicId",
            ["GET"],
            Predicate::User(true),
        )]))
        .unwrap_err();
        assert!(matches!(err, CompileError::MalformedPattern { .. }));
    }

    #[test]
    fn test_duplicate_rule_rejected() {
        let err = CompiledPolicy::compile(&source(vec![
            RuleDefinition::new(
                "/v1/clinics/{clinicId}/patients/{patientId}",
                ["GET", "PUT"],
                Predicate::owner("patientId"),
            ),
            // Same shape with renamed parameters is the same rule.
            RuleDefinition::new(
                "/v1/clinics/{id}/patients/{pid}",
                ["PUT"],
                Predicate::owner("pid"),
            ),
        ]))
        .unwrap_err();
        assert_eq!(
            err,
            CompileError::DuplicateRule {
                method: "PUT".to_string(),
                pattern: "/v1/clinics/{id}/patients/{pid}".to_string(),
                existing: "/v1/clinics/{clinicId}/patients/{patientId}".to_string(),
            }
        );
    }

    #[test]
    fn test_same_endpoint_different_predicates_allowed() {
        let policy = CompiledPolicy::compile(&source(vec![
            RuleDefinition::new("/v1/clinics", ["GET"], Predicate::service(["orca"])),
            RuleDefinition::new("/v1/clinics", ["GET"], Predicate::service(["hydrophone"])),
        ]))
        .unwrap();
        let req = RequestDescriptor::normalize("GET", "/v1/clinics").unwrap();
        assert_eq!(policy.candidates(&req).len(), 2);
    }

    #[test]
    fn test_service_set_order_does_not_matter_for_duplicates() {
        let err = CompiledPolicy::compile(&source(vec![
            RuleDefinition::new("/v1/clinics", ["GET"], Predicate::service(["a", "b"])),
            RuleDefinition::new("/v1/clinics", ["GET"], Predicate::service(["b", "a"])),
        ]))
        .unwrap_err();
        assert!(matches!(err, CompileError::DuplicateRule { .. }));
    }

    #[test]
    fn test_from_file_missing() {
        let err = CompiledPolicy::from_file(Path::new("/nonexistent/rules.toml")).unwrap_err();
        assert!(matches!(err, CompileError::InvalidSource { .. }));
    }
}
