// placement.rs — Placement classifier
//
// Labels every node of an expression with the tier(s) it touches, mirroring
// the expression tree.
//
// Preconditions: the expression is well-typed.
// Postconditions: `TierTree` has one node per IR node, children in
//   `Expr::children` order.
// Failure modes: `MalformedIrError` when a non-intrinsic call passes values
//   of both tiers.
// Side effects: none.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::MalformedIrError;
use crate::ir::{Expr, ExprKind};
use crate::types::{Placement, PlacementSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    Unplaced,
    Coordinator,
    Participants,
    CrossTier,
}

impl Tier {
    pub fn join(self, other: Tier) -> Tier {
        match (self, other) {
            (Tier::Unplaced, t) | (t, Tier::Unplaced) => t,
            (a, b) if a == b => a,
            _ => Tier::CrossTier,
        }
    }

    pub fn from_placements(set: PlacementSet) -> Tier {
        match (set.coordinator, set.participants) {
            (false, false) => Tier::Unplaced,
            (true, false) => Tier::Coordinator,
            (false, true) => Tier::Participants,
            (true, true) => Tier::CrossTier,
        }
    }

    /// Whether a node of tier `self` may appear in a block restricted to
    /// `required`. `CrossTier` admits everything.
    pub fn fits(self, required: Tier) -> bool {
        self == Tier::Unplaced || required == Tier::CrossTier || self == required
    }
}

impl From<Placement> for Tier {
    fn from(p: Placement) -> Tier {
        match p {
            Placement::Coordinator => Tier::Coordinator,
            Placement::Participants => Tier::Participants,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tier::Unplaced => "UNPLACED",
            Tier::Coordinator => "COORDINATOR",
            Tier::Participants => "PARTICIPANTS",
            Tier::CrossTier => "CROSS-TIER",
        };
        write!(f, "{name}")
    }
}

/// Tier labels mirroring an expression tree.
#[derive(Debug, Clone, PartialEq)]
pub struct TierTree {
    pub tier: Tier,
    pub children: Vec<TierTree>,
}

impl TierTree {
    /// Pre-order walk over `(expr, tier)` pairs of the labelled expression.
    pub fn walk<'a>(&self, expr: &'a Expr, f: &mut impl FnMut(&'a Expr, Tier)) {
        f(expr, self.tier);
        for (child_tree, child) in self.children.iter().zip(expr.children()) {
            child_tree.walk(child, f);
        }
    }

    /// Render one line per node, indented by depth.
    pub fn render(&self, expr: &Expr) -> String {
        let mut out = String::new();
        self.render_into(expr, 0, &mut out);
        out
    }

    fn render_into(&self, expr: &Expr, depth: usize, out: &mut String) {
        let label = match &expr.kind {
            ExprKind::Reference(n) => format!("ref {n}"),
            ExprKind::Literal(l) => format!("lit {l}"),
            ExprKind::Struct(e) => format!("struct/{}", e.len()),
            ExprKind::Selection { index, .. } => format!("select [{index}]"),
            ExprKind::Call { .. } => "call".to_string(),
            ExprKind::Lambda { parameter, .. } => {
                format!("lambda {}", parameter.as_deref().unwrap_or("()"))
            }
            ExprKind::Block { locals, .. } => {
                let names: Vec<&str> = locals.iter().map(|(n, _)| n.as_str()).collect();
                format!("block [{}]", names.join(", "))
            }
            ExprKind::Intrinsic { uri } => format!("intrinsic {uri}"),
            ExprKind::Builtin(b) => format!("builtin {}", b.name()),
        };
        out.push_str(&format!(
            "{:indent$}{label} : {} @ {}\n",
            "",
            expr.ty,
            self.tier,
            indent = depth * 2
        ));
        for (child_tree, child) in self.children.iter().zip(expr.children()) {
            child_tree.render_into(child, depth + 1, out);
        }
    }
}

/// Classify every node of `expr`.
pub fn classify(expr: &Expr) -> Result<TierTree, MalformedIrError> {
    let children = expr
        .children()
        .into_iter()
        .map(classify)
        .collect::<Result<Vec<_>, _>>()?;

    if let ExprKind::Call { function, argument } = &expr.kind {
        let is_intrinsic = matches!(function.kind, ExprKind::Intrinsic { .. });
        let argument_crosses = argument
            .as_ref()
            .is_some_and(|a| a.ty.placements().is_cross_tier());
        if !is_intrinsic && argument_crosses {
            return Err(MalformedIrError {
                call: expr.to_string(),
            });
        }
    }

    let own = Tier::from_placements(expr.ty.placements());
    let tier = children.iter().fold(own, |acc, c| acc.join(c.tier));
    Ok(TierTree { tier, children })
}

/// Tier of the root of `expr`.
pub fn tier_of(expr: &Expr) -> Result<Tier, MalformedIrError> {
    classify(expr).map(|t| t.tier)
}
