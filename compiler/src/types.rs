// types.rs — Type system for round computations
//
// Scalar, tuple, sequence, function and federated (placed) types. Placements
// live on federated types only; every other type is unplaced.
//
// Preconditions: none (types only).
// Postconditions: `Display` output re-parses to the same type.
// Failure modes: none.
// Side effects: none.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── Placement ───────────────────────────────────────────────────────────────

/// Tier a federated value lives at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Placement {
    Coordinator,
    Participants,
}

impl Placement {
    /// Parse a placement literal. Both the short (`SERVER`, `CLIENTS`) and the
    /// long (`COORDINATOR`, `PARTICIPANTS`) spellings are accepted.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "SERVER" | "COORDINATOR" => Some(Placement::Coordinator),
            "CLIENTS" | "PARTICIPANTS" => Some(Placement::Participants),
            _ => None,
        }
    }

    pub fn other(self) -> Placement {
        match self {
            Placement::Coordinator => Placement::Participants,
            Placement::Participants => Placement::Coordinator,
        }
    }
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Placement::Coordinator => write!(f, "SERVER"),
            Placement::Participants => write!(f, "CLIENTS"),
        }
    }
}

// ── Scalars ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    Int32,
    Float32,
    Bool,
}

impl ScalarType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "int32" => Some(ScalarType::Int32),
            "float32" => Some(ScalarType::Float32),
            "bool" => Some(ScalarType::Bool),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ScalarType::Int32 => "int32",
            ScalarType::Float32 => "float32",
            ScalarType::Bool => "bool",
        }
    }
}

// ── Type ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Scalar(ScalarType),
    /// Positional tuple. `<>` is the empty type used for absent values.
    Struct(Vec<Type>),
    Sequence(Box<Type>),
    Function {
        parameter: Option<Box<Type>>,
        result: Box<Type>,
    },
    /// A value placed at one tier. `all_equal` values are a single value
    /// (always the case at the coordinator); otherwise one member value per
    /// participant.
    Federated {
        member: Box<Type>,
        placement: Placement,
        all_equal: bool,
    },
}

/// Which tiers occur anywhere inside a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlacementSet {
    pub coordinator: bool,
    pub participants: bool,
}

impl PlacementSet {
    pub fn union(self, other: PlacementSet) -> PlacementSet {
        PlacementSet {
            coordinator: self.coordinator || other.coordinator,
            participants: self.participants || other.participants,
        }
    }

    pub fn is_empty(self) -> bool {
        !self.coordinator && !self.participants
    }

    pub fn is_cross_tier(self) -> bool {
        self.coordinator && self.participants
    }

    pub fn contains(self, placement: Placement) -> bool {
        match placement {
            Placement::Coordinator => self.coordinator,
            Placement::Participants => self.participants,
        }
    }
}

impl Type {
    pub fn int32() -> Type {
        Type::Scalar(ScalarType::Int32)
    }

    pub fn float32() -> Type {
        Type::Scalar(ScalarType::Float32)
    }

    pub fn boolean() -> Type {
        Type::Scalar(ScalarType::Bool)
    }

    /// The empty tuple `<>`.
    pub fn empty() -> Type {
        Type::Struct(Vec::new())
    }

    pub fn tuple(elements: Vec<Type>) -> Type {
        Type::Struct(elements)
    }

    pub fn sequence(element: Type) -> Type {
        Type::Sequence(Box::new(element))
    }

    pub fn function(parameter: Option<Type>, result: Type) -> Type {
        Type::Function {
            parameter: parameter.map(Box::new),
            result: Box::new(result),
        }
    }

    pub fn federated(member: Type, placement: Placement, all_equal: bool) -> Type {
        Type::Federated {
            member: Box::new(member),
            placement,
            // A coordinator holds exactly one value.
            all_equal: all_equal || placement == Placement::Coordinator,
        }
    }

    /// `T@SERVER`.
    pub fn at_coordinator(member: Type) -> Type {
        Type::federated(member, Placement::Coordinator, true)
    }

    /// `{T}@CLIENTS`.
    pub fn at_participants(member: Type) -> Type {
        Type::federated(member, Placement::Participants, false)
    }

    pub fn is_empty_struct(&self) -> bool {
        matches!(self, Type::Struct(elements) if elements.is_empty())
    }

    pub fn as_struct(&self) -> Option<&[Type]> {
        match self {
            Type::Struct(elements) => Some(elements),
            _ => None,
        }
    }

    /// `(parameter, result)` of a function type.
    pub fn as_function(&self) -> Option<(Option<&Type>, &Type)> {
        match self {
            Type::Function { parameter, result } => Some((parameter.as_deref(), result)),
            _ => None,
        }
    }

    /// Placement of a federated type; `None` for unplaced types.
    pub fn placement(&self) -> Option<Placement> {
        match self {
            Type::Federated { placement, .. } => Some(*placement),
            _ => None,
        }
    }

    pub fn federated_member(&self) -> Option<&Type> {
        match self {
            Type::Federated { member, .. } => Some(member),
            _ => None,
        }
    }

    pub fn is_all_equal(&self) -> bool {
        matches!(self, Type::Federated { all_equal: true, .. })
    }

    /// Tiers mentioned anywhere in this type.
    pub fn placements(&self) -> PlacementSet {
        match self {
            Type::Scalar(_) => PlacementSet::default(),
            Type::Struct(elements) => elements
                .iter()
                .fold(PlacementSet::default(), |acc, t| acc.union(t.placements())),
            Type::Sequence(element) => element.placements(),
            Type::Function { parameter, result } => {
                let p = parameter
                    .as_ref()
                    .map(|p| p.placements())
                    .unwrap_or_default();
                p.union(result.placements())
            }
            Type::Federated {
                member, placement, ..
            } => {
                let own = match placement {
                    Placement::Coordinator => PlacementSet {
                        coordinator: true,
                        participants: false,
                    },
                    Placement::Participants => PlacementSet {
                        coordinator: false,
                        participants: true,
                    },
                };
                own.union(member.placements())
            }
        }
    }

    pub fn contains_federated(&self) -> bool {
        !self.placements().is_empty()
    }

    /// Numeric types accepted by the arithmetic builtins: `int32`, `float32`
    /// and tuples of numeric types.
    pub fn is_numeric(&self) -> bool {
        match self {
            Type::Scalar(ScalarType::Int32) | Type::Scalar(ScalarType::Float32) => true,
            Type::Struct(elements) => elements.iter().all(Type::is_numeric),
            _ => false,
        }
    }

    /// Integer-only types accepted by the secure-sum family.
    pub fn is_integer(&self) -> bool {
        match self {
            Type::Scalar(ScalarType::Int32) => true,
            Type::Struct(elements) => elements.iter().all(Type::is_integer),
            _ => false,
        }
    }

    /// Whether a value of type `other` may be used where `self` is expected.
    ///
    /// Identical types are assignable; an all-equal participant value may
    /// stand in for a per-participant collection of the same member type.
    pub fn is_assignable_from(&self, other: &Type) -> bool {
        match (self, other) {
            (Type::Scalar(a), Type::Scalar(b)) => a == b,
            (Type::Struct(a), Type::Struct(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.is_assignable_from(y))
            }
            (Type::Sequence(a), Type::Sequence(b)) => a.is_assignable_from(b),
            (
                Type::Function {
                    parameter: pa,
                    result: ra,
                },
                Type::Function {
                    parameter: pb,
                    result: rb,
                },
            ) => {
                let params = match (pa, pb) {
                    (None, None) => true,
                    (Some(a), Some(b)) => b.is_assignable_from(a),
                    _ => false,
                };
                params && ra.is_assignable_from(rb)
            }
            (
                Type::Federated {
                    member: ma,
                    placement: pa,
                    all_equal: ea,
                },
                Type::Federated {
                    member: mb,
                    placement: pb,
                    all_equal: eb,
                },
            ) => pa == pb && (!ea || *eb) && ma.is_assignable_from(mb),
            _ => false,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Scalar(s) => write!(f, "{}", s.name()),
            Type::Struct(elements) => {
                write!(f, "<")?;
                for (i, t) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{t}")?;
                }
                write!(f, ">")
            }
            Type::Sequence(element) => write!(f, "{element}*"),
            Type::Function { parameter, result } => match parameter {
                Some(p) => write!(f, "({p} -> {result})"),
                None => write!(f, "( -> {result})"),
            },
            Type::Federated {
                member,
                placement,
                all_equal,
            } => {
                if *all_equal {
                    write!(f, "{member}@{placement}")
                } else {
                    write!(f, "{{{member}}}@{placement}")
                }
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
