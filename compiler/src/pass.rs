// pass.rs — Pass descriptor module: metadata, dependency resolution, artifact IDs
//
// Declares the compiler's semantic passes (parse is outside the runner),
// their dependency edges, and the artifacts they produce. Used by the pipeline
// runner to compute minimal pass subsets for each --emit target.

use std::collections::HashSet;

// ── Pass and Artifact identifiers ──────────────────────────────────────────

/// Identifies each compiler pass (parse excluded, it runs before the runner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    Elaborate,
    Classify,
    Recognize,
    Match,
    Validate,
    Synthesize,
    Evaluate,
}

/// Machine-readable artifact identifiers. Each maps to a field of the
/// compilation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    Round,       // ir::Expr
    Tiers,       // TierTree
    Boundaries,  // Vec<IntrinsicCall>
    Parts,       // FormParts
    Form,        // Form
    Synthesized, // ir::Expr
    Evaluation,  // Evaluation
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a compiler pass.
pub struct PassDescriptor {
    /// Human-readable name for diagnostics/verbose output.
    pub name: &'static str,
    /// Pass dependencies (other passes whose outputs this pass consumes).
    pub inputs: &'static [PassId],
    /// Artifacts this pass produces.
    pub outputs: &'static [ArtifactId],
    /// Postconditions, for documentation and verbose output.
    pub invariants: &'static str,
}

/// Return the static descriptor for a given pass.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::Elaborate => PassDescriptor {
            name: "elaborate",
            inputs: &[],
            outputs: &[ArtifactId::Round],
            invariants: "names resolved, every node typed",
        },
        PassId::Classify => PassDescriptor {
            name: "classify",
            inputs: &[PassId::Elaborate],
            outputs: &[ArtifactId::Tiers],
            invariants: "every node has a tier, no call mixes tiers",
        },
        PassId::Recognize => PassDescriptor {
            name: "recognize",
            inputs: &[PassId::Elaborate],
            outputs: &[ArtifactId::Boundaries],
            invariants: "every tier-crossing call is one of the five primitives",
        },
        PassId::Match => PassDescriptor {
            name: "match",
            inputs: &[PassId::Classify, PassId::Recognize],
            outputs: &[ArtifactId::Parts],
            invariants: "every slot bound to an extracted local block",
        },
        PassId::Validate => PassDescriptor {
            name: "validate",
            inputs: &[PassId::Match],
            outputs: &[ArtifactId::Form],
            invariants: "slot signatures compose",
        },
        PassId::Synthesize => PassDescriptor {
            name: "synthesize",
            inputs: &[PassId::Validate],
            outputs: &[ArtifactId::Synthesized],
            invariants: "rebuilt round has the form's type signature",
        },
        PassId::Evaluate => PassDescriptor {
            name: "evaluate",
            inputs: &[PassId::Validate],
            outputs: &[ArtifactId::Evaluation],
            invariants: "form and round agree on the given inputs",
        },
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All pass IDs in declaration order (used for iteration).
pub const ALL_PASSES: [PassId; 7] = [
    PassId::Elaborate,
    PassId::Classify,
    PassId::Recognize,
    PassId::Match,
    PassId::Validate,
    PassId::Synthesize,
    PassId::Evaluate,
];

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_passes_classify_is_minimal() {
        assert_eq!(
            required_passes(PassId::Classify),
            vec![PassId::Elaborate, PassId::Classify]
        );
    }

    #[test]
    fn required_passes_validate_includes_front_half() {
        assert_eq!(
            required_passes(PassId::Validate),
            vec![
                PassId::Elaborate,
                PassId::Classify,
                PassId::Recognize,
                PassId::Match,
                PassId::Validate,
            ]
        );
    }

    #[test]
    fn evaluate_skips_synthesis() {
        let passes = required_passes(PassId::Evaluate);
        assert!(!passes.contains(&PassId::Synthesize));
        assert_eq!(passes.last(), Some(&PassId::Evaluate));
    }

    #[test]
    fn all_descriptors_have_outputs() {
        for pass in &ALL_PASSES {
            let desc = descriptor(*pass);
            assert!(
                !desc.outputs.is_empty(),
                "pass {:?} has no outputs declared",
                pass
            );
        }
    }

    #[test]
    fn dependency_edges_are_consistent() {
        for pass in &ALL_PASSES {
            let desc = descriptor(*pass);
            let order = required_passes(*pass);
            for dep in desc.inputs {
                let dep_pos = order.iter().position(|p| p == dep);
                let self_pos = order.iter().position(|p| p == pass);
                assert!(
                    dep_pos.unwrap() < self_pos.unwrap(),
                    "{:?} depends on {:?} but it comes later in topological order",
                    pass,
                    dep
                );
            }
        }
    }
}
