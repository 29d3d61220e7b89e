/// Validation steps of the trust chain pipeline
use crate::chain::{
    ChainViolation, ValidationContext, ValidationStep, CLOCK_SKEW_SECS,
    SUPPORTED_CRITICAL_CLAIMS, SUPPORTED_POLICY_OPERATORS,
};
use crate::statement::{EntityStatement, FEDERATION_ENTITY};
use jsonwebtoken::jwk::JwkSet;

/// Signature, linkage and validity-window checks
pub struct SignatureStep {
    trusted_keys: JwkSet,
}

impl SignatureStep {
    /// `trusted_keys` is the trust anchor key set, obtained out of band
    pub fn new(trusted_keys: JwkSet) -> Self {
        Self { trusted_keys }
    }
}

impl ValidationStep for SignatureStep {
    fn name(&self) -> &'static str {
        "signature"
    }

    fn validate(&self, chain: &[EntityStatement], ctx: &ValidationContext) -> Vec<ChainViolation> {
        let Some(last) = chain.len().checked_sub(1) else {
            return vec![ChainViolation::EmptyChain];
        };
        let mut violations = Vec::new();

        for (index, statement) in chain.iter().enumerate() {
            if statement.iat > ctx.now.saturating_add(CLOCK_SKEW_SECS) {
                violations.push(ChainViolation::NotYetValid {
                    index,
                    subject: statement.sub.clone(),
                });
            }
            if ctx.now > statement.exp {
                violations.push(ChainViolation::Expired {
                    index,
                    subject: statement.sub.clone(),
                });
            }
        }

        // A single-statement chain is its own anchor, checked below
        if last > 0 {
            check_self_signed(&chain[0], 0, &mut violations);
        }

        for (index, pair) in chain.windows(2).enumerate() {
            let (current, next) = (&pair[0], &pair[1]);

            if current.iss != next.sub {
                violations.push(ChainViolation::BrokenLink {
                    index,
                    issuer: current.iss.clone(),
                    next_subject: next.sub.clone(),
                });
                continue;
            }

            let result = match &next.jwks {
                Some(keys) => current.verify(keys).map_err(|e| e.to_string()),
                None => Err(format!("{} publishes no keys", next.sub)),
            };
            if let Err(reason) = result {
                violations.push(ChainViolation::InvalidSignature {
                    index,
                    subject: current.sub.clone(),
                    reason,
                });
            }
        }

        let anchor = &chain[last];
        check_self_signed(anchor, last, &mut violations);
        if let Err(e) = anchor.verify(&self.trusted_keys) {
            violations.push(ChainViolation::UntrustedAnchor {
                subject: anchor.sub.clone(),
                reason: e.to_string(),
            });
        }

        violations
    }
}

fn check_self_signed(statement: &EntityStatement, index: usize, violations: &mut Vec<ChainViolation>) {
    if !statement.is_self_statement() {
        violations.push(ChainViolation::NotSelfSigned {
            index,
            subject: statement.sub.clone(),
        });
    } else if let Err(e) = statement.verify_self_signed() {
        violations.push(ChainViolation::InvalidSignature {
            index,
            subject: statement.sub.clone(),
            reason: e.to_string(),
        });
    }
}

/// Path length, naming and leaf entity type constraints
///
/// Constraints declared by a statement apply to every statement below it,
/// so the chain is walked root-first here.
pub struct ConstraintStep;

impl ValidationStep for ConstraintStep {
    fn name(&self) -> &'static str {
        "constraints"
    }

    fn validate(&self, chain: &[EntityStatement], _ctx: &ValidationContext) -> Vec<ChainViolation> {
        let ordered: Vec<&EntityStatement> = chain.iter().rev().collect();
        let mut violations = Vec::new();

        for (position, statement) in ordered.iter().enumerate() {
            let Some(constraints) = &statement.constraints else {
                continue;
            };
            let rest = &ordered[position + 1..];
            let Some(leaf) = rest.last() else {
                continue;
            };
            // Report positions in the caller's leaf-first order
            let index = chain.len() - 1 - position;

            if let Some(max) = constraints.max_path_length {
                let actual = rest.len() - usize::from(leaf.is_self_statement());
                if actual > max {
                    violations.push(ChainViolation::MaxPathLengthExceeded { index, max, actual });
                }
            }

            if let Some(naming) = &constraints.naming_constraints {
                let mut subjects: Vec<&str> = rest.iter().map(|s| s.sub.as_str()).collect();
                subjects.dedup();

                for subject in subjects {
                    if let Some(permitted) = &naming.permitted {
                        if !permitted.iter().any(|prefix| subject.starts_with(prefix.as_str())) {
                            violations.push(ChainViolation::SubjectNotPermitted {
                                index,
                                subject: subject.to_string(),
                            });
                        }
                    }

                    let excluded_by = naming
                        .excluded
                        .iter()
                        .flatten()
                        .find(|prefix| subject.starts_with(prefix.as_str()));
                    if let Some(prefix) = excluded_by {
                        violations.push(ChainViolation::SubjectExcluded {
                            index,
                            subject: subject.to_string(),
                            prefix: prefix.clone(),
                        });
                    }
                }
            }

            if let Some(allowed) = &constraints.allowed_leaf_entity_types {
                for entity_type in leaf.entity_types() {
                    if entity_type != FEDERATION_ENTITY && !allowed.iter().any(|a| a == entity_type) {
                        violations.push(ChainViolation::LeafEntityTypeNotAllowed {
                            index,
                            entity_type: entity_type.to_string(),
                        });
                    }
                }
            }
        }

        violations
    }
}

/// Fail closed on critical claims and policy operators we don't implement
pub struct CriticalClaimsStep;

impl ValidationStep for CriticalClaimsStep {
    fn name(&self) -> &'static str {
        "critical_claims"
    }

    fn validate(&self, chain: &[EntityStatement], _ctx: &ValidationContext) -> Vec<ChainViolation> {
        let mut violations = Vec::new();

        for (index, statement) in chain.iter().enumerate() {
            for claim in statement.crit.iter().flatten() {
                if !SUPPORTED_CRITICAL_CLAIMS.contains(&claim.as_str()) {
                    violations.push(ChainViolation::UnsupportedCriticalClaim {
                        index,
                        claim: claim.clone(),
                    });
                }
            }

            for operator in statement.metadata_policy_crit.iter().flatten() {
                if !SUPPORTED_POLICY_OPERATORS.contains(&operator.as_str()) {
                    violations.push(ChainViolation::UnsupportedPolicyOperator {
                        index,
                        operator: operator.clone(),
                    });
                }
            }
        }

        violations
    }
}
