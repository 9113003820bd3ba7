// forms.rs — The restricted factored forms
//
// `MapReduceForm` (seven functions plus three secure-sum parameter blocks),
// `DistributeAggregateForm` (five placed lambdas) and `BroadcastForm` (two
// functions, no aggregation). Forms are immutable and only exist validated:
// the builders and deserialization both run the validator.
//
// Preconditions: none.
// Postconditions: every constructed form satisfies the validator.
// Failure modes: `IncompatibleFormError` from the builders.
// Side effects: none.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::IncompatibleFormError;
use crate::ir::Expr;
use crate::local_block::LocalBlock;
use crate::types::{Placement, Type};
use crate::validate;

// ── Templates ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Template {
    MapReduce,
    DistributeAggregate,
    Broadcast,
}

impl Template {
    pub fn name(self) -> &'static str {
        match self {
            Template::MapReduce => "map-reduce",
            Template::DistributeAggregate => "distribute-aggregate",
            Template::Broadcast => "broadcast",
        }
    }

    /// Slot names in template order.
    pub fn slots(self) -> &'static [&'static str] {
        match self {
            Template::MapReduce => &slots::MAP_REDUCE,
            Template::DistributeAggregate => &slots::DISTRIBUTE_AGGREGATE,
            Template::Broadcast => &slots::BROADCAST,
        }
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

pub mod slots {
    pub const PREPARE: &str = "prepare";
    pub const WORK: &str = "work";
    pub const ZERO: &str = "zero";
    pub const ACCUMULATE: &str = "accumulate";
    pub const MERGE: &str = "merge";
    pub const REPORT: &str = "report";
    pub const SECURE_SUM_BITWIDTH: &str = "secure_sum_bitwidth";
    pub const SECURE_SUM_MAX_INPUT: &str = "secure_sum_max_input";
    pub const SECURE_MODULAR_SUM_MODULUS: &str = "secure_modular_sum_modulus";
    pub const UPDATE: &str = "update";

    pub const SERVER_PREPARE: &str = "server_prepare";
    pub const SERVER_TO_CLIENT_BROADCAST: &str = "server_to_client_broadcast";
    pub const CLIENT_WORK: &str = "client_work";
    pub const CLIENT_TO_SERVER_AGGREGATION: &str = "client_to_server_aggregation";
    pub const SERVER_RESULT: &str = "server_result";

    pub const COMPUTE_SERVER_CONTEXT: &str = "compute_server_context";
    pub const CLIENT_PROCESSING: &str = "client_processing";

    pub const MAP_REDUCE: [&str; 10] = [
        PREPARE,
        WORK,
        ZERO,
        ACCUMULATE,
        MERGE,
        REPORT,
        SECURE_SUM_BITWIDTH,
        SECURE_SUM_MAX_INPUT,
        SECURE_MODULAR_SUM_MODULUS,
        UPDATE,
    ];

    pub const DISTRIBUTE_AGGREGATE: [&str; 5] = [
        SERVER_PREPARE,
        SERVER_TO_CLIENT_BROADCAST,
        CLIENT_WORK,
        CLIENT_TO_SERVER_AGGREGATION,
        SERVER_RESULT,
    ];

    pub const BROADCAST: [&str; 2] = [COMPUTE_SERVER_CONTEXT, CLIENT_PROCESSING];

    /// Secure-sum parameter slots, indexed by channel.
    pub const SECURE_PARAMETERS: [&str; 3] = [
        SECURE_SUM_BITWIDTH,
        SECURE_SUM_MAX_INPUT,
        SECURE_MODULAR_SUM_MODULUS,
    ];
}

// ── Unvalidated parts ───────────────────────────────────────────────────────

/// Slot expressions of a seven-function form, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapReduceParts {
    pub prepare: Expr,
    pub work: Expr,
    pub zero: Expr,
    pub accumulate: Expr,
    pub merge: Expr,
    pub report: Expr,
    pub secure_sum_bitwidth: Expr,
    pub secure_sum_max_input: Expr,
    pub secure_modular_sum_modulus: Expr,
    pub update: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributeAggregateParts {
    pub server_prepare: Expr,
    pub server_to_client_broadcast: Expr,
    pub client_work: Expr,
    pub client_to_server_aggregation: Expr,
    pub server_result: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastParts {
    pub compute_server_context: Expr,
    pub client_processing: Expr,
}

/// Matcher output for any template.
#[derive(Debug, Clone, PartialEq)]
pub enum FormParts {
    MapReduce(MapReduceParts),
    DistributeAggregate(DistributeAggregateParts),
    Broadcast(BroadcastParts),
}

// ── Seven-function form ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MapReduceParts", into = "MapReduceParts")]
pub struct MapReduceForm {
    pub(crate) prepare: LocalBlock,
    pub(crate) work: LocalBlock,
    pub(crate) zero: LocalBlock,
    pub(crate) accumulate: LocalBlock,
    pub(crate) merge: LocalBlock,
    pub(crate) report: LocalBlock,
    pub(crate) secure_sum_bitwidth: LocalBlock,
    pub(crate) secure_sum_max_input: LocalBlock,
    pub(crate) secure_modular_sum_modulus: LocalBlock,
    pub(crate) update: LocalBlock,
}

impl MapReduceForm {
    /// Validate `parts` and build the form.
    pub fn new(parts: MapReduceParts) -> Result<Self, IncompatibleFormError> {
        validate::map_reduce(&parts)
    }

    pub fn prepare(&self) -> &LocalBlock {
        &self.prepare
    }

    pub fn work(&self) -> &LocalBlock {
        &self.work
    }

    pub fn zero(&self) -> &LocalBlock {
        &self.zero
    }

    pub fn accumulate(&self) -> &LocalBlock {
        &self.accumulate
    }

    pub fn merge(&self) -> &LocalBlock {
        &self.merge
    }

    pub fn report(&self) -> &LocalBlock {
        &self.report
    }

    /// Parameter block of secure channel `channel` (bitwidth, max-input,
    /// modulus).
    pub fn secure_parameter(&self, channel: usize) -> Option<&LocalBlock> {
        match channel {
            0 => Some(&self.secure_sum_bitwidth),
            1 => Some(&self.secure_sum_max_input),
            2 => Some(&self.secure_modular_sum_modulus),
            _ => None,
        }
    }

    pub fn update(&self) -> &LocalBlock {
        &self.update
    }

    /// `S`, the state type.
    pub fn state_type(&self) -> &Type {
        self.prepare.parameter_type().unwrap_or(&EMPTY)
    }

    /// `D`, the per-participant data type.
    pub fn client_data_type(&self) -> &Type {
        param_element(&self.work, 0)
    }

    /// `C`, the broadcast context type.
    pub fn broadcast_type(&self) -> &Type {
        self.prepare.result_type()
    }

    /// `U`, the per-participant update type.
    pub fn client_update_type(&self) -> &Type {
        result_element(&self.work, 0)
    }

    /// `V`, the tuple of the three secure channels.
    pub fn secure_type(&self) -> &Type {
        result_element(&self.work, 1)
    }

    /// `A`, the accumulator type.
    pub fn accumulator_type(&self) -> &Type {
        self.zero.result_type()
    }

    /// `R`, the aggregation report type.
    pub fn report_type(&self) -> &Type {
        self.report.result_type()
    }

    /// `X`, the round output type.
    pub fn output_type(&self) -> &Type {
        result_element(&self.update, 1)
    }

    /// Type of the round computation this form factors.
    pub fn type_signature(&self) -> Type {
        round_type(
            self.state_type(),
            self.client_data_type(),
            Type::tuple(vec![
                Type::at_coordinator(self.state_type().clone()),
                Type::at_coordinator(self.output_type().clone()),
            ]),
        )
    }

    pub fn slots(&self) -> Vec<(&'static str, &LocalBlock)> {
        vec![
            (slots::PREPARE, &self.prepare),
            (slots::WORK, &self.work),
            (slots::ZERO, &self.zero),
            (slots::ACCUMULATE, &self.accumulate),
            (slots::MERGE, &self.merge),
            (slots::REPORT, &self.report),
            (slots::SECURE_SUM_BITWIDTH, &self.secure_sum_bitwidth),
            (slots::SECURE_SUM_MAX_INPUT, &self.secure_sum_max_input),
            (slots::SECURE_MODULAR_SUM_MODULUS, &self.secure_modular_sum_modulus),
            (slots::UPDATE, &self.update),
        ]
    }

    pub fn to_parts(&self) -> MapReduceParts {
        MapReduceParts {
            prepare: self.prepare.payload().clone(),
            work: self.work.payload().clone(),
            zero: self.zero.payload().clone(),
            accumulate: self.accumulate.payload().clone(),
            merge: self.merge.payload().clone(),
            report: self.report.payload().clone(),
            secure_sum_bitwidth: self.secure_sum_bitwidth.payload().clone(),
            secure_sum_max_input: self.secure_sum_max_input.payload().clone(),
            secure_modular_sum_modulus: self.secure_modular_sum_modulus.payload().clone(),
            update: self.update.payload().clone(),
        }
    }
}

impl TryFrom<MapReduceParts> for MapReduceForm {
    type Error = IncompatibleFormError;

    fn try_from(parts: MapReduceParts) -> Result<Self, Self::Error> {
        MapReduceForm::new(parts)
    }
}

impl From<MapReduceForm> for MapReduceParts {
    fn from(form: MapReduceForm) -> Self {
        form.to_parts()
    }
}

// ── Five-lambda form ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DistributeAggregateParts", into = "DistributeAggregateParts")]
pub struct DistributeAggregateForm {
    pub(crate) server_prepare: LocalBlock,
    pub(crate) server_to_client_broadcast: LocalBlock,
    pub(crate) client_work: LocalBlock,
    pub(crate) client_to_server_aggregation: LocalBlock,
    pub(crate) server_result: LocalBlock,
}

impl DistributeAggregateForm {
    pub fn new(parts: DistributeAggregateParts) -> Result<Self, IncompatibleFormError> {
        validate::distribute_aggregate(&parts)
    }

    pub fn server_prepare(&self) -> &LocalBlock {
        &self.server_prepare
    }

    pub fn server_to_client_broadcast(&self) -> &LocalBlock {
        &self.server_to_client_broadcast
    }

    pub fn client_work(&self) -> &LocalBlock {
        &self.client_work
    }

    pub fn client_to_server_aggregation(&self) -> &LocalBlock {
        &self.client_to_server_aggregation
    }

    pub fn server_result(&self) -> &LocalBlock {
        &self.server_result
    }

    /// `T`, the temporary coordinator state carried across aggregation.
    pub fn temporary_state_type(&self) -> &Type {
        result_element(&self.server_prepare, 1)
    }

    pub fn type_signature(&self) -> Type {
        let state = self
            .server_prepare
            .parameter_type()
            .and_then(Type::federated_member)
            .unwrap_or(&EMPTY);
        let data = param_element(&self.client_work, 0)
            .federated_member()
            .unwrap_or(&EMPTY);
        round_type(state, data, self.server_result.result_type().clone())
    }

    pub fn slots(&self) -> Vec<(&'static str, &LocalBlock)> {
        vec![
            (slots::SERVER_PREPARE, &self.server_prepare),
            (slots::SERVER_TO_CLIENT_BROADCAST, &self.server_to_client_broadcast),
            (slots::CLIENT_WORK, &self.client_work),
            (slots::CLIENT_TO_SERVER_AGGREGATION, &self.client_to_server_aggregation),
            (slots::SERVER_RESULT, &self.server_result),
        ]
    }

    pub fn to_parts(&self) -> DistributeAggregateParts {
        DistributeAggregateParts {
            server_prepare: self.server_prepare.payload().clone(),
            server_to_client_broadcast: self.server_to_client_broadcast.payload().clone(),
            client_work: self.client_work.payload().clone(),
            client_to_server_aggregation: self.client_to_server_aggregation.payload().clone(),
            server_result: self.server_result.payload().clone(),
        }
    }
}

impl TryFrom<DistributeAggregateParts> for DistributeAggregateForm {
    type Error = IncompatibleFormError;

    fn try_from(parts: DistributeAggregateParts) -> Result<Self, Self::Error> {
        DistributeAggregateForm::new(parts)
    }
}

impl From<DistributeAggregateForm> for DistributeAggregateParts {
    fn from(form: DistributeAggregateForm) -> Self {
        form.to_parts()
    }
}

// ── Broadcast form ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BroadcastParts", into = "BroadcastParts")]
pub struct BroadcastForm {
    pub(crate) compute_server_context: LocalBlock,
    pub(crate) client_processing: LocalBlock,
}

impl BroadcastForm {
    pub fn new(parts: BroadcastParts) -> Result<Self, IncompatibleFormError> {
        validate::broadcast(&parts)
    }

    pub fn compute_server_context(&self) -> &LocalBlock {
        &self.compute_server_context
    }

    pub fn client_processing(&self) -> &LocalBlock {
        &self.client_processing
    }

    pub fn type_signature(&self) -> Type {
        let state = self.compute_server_context.parameter_type().unwrap_or(&EMPTY);
        let data = param_element(&self.client_processing, 1);
        round_type(
            state,
            data,
            Type::at_participants(self.client_processing.result_type().clone()),
        )
    }

    pub fn slots(&self) -> Vec<(&'static str, &LocalBlock)> {
        vec![
            (slots::COMPUTE_SERVER_CONTEXT, &self.compute_server_context),
            (slots::CLIENT_PROCESSING, &self.client_processing),
        ]
    }

    pub fn to_parts(&self) -> BroadcastParts {
        BroadcastParts {
            compute_server_context: self.compute_server_context.payload().clone(),
            client_processing: self.client_processing.payload().clone(),
        }
    }
}

impl TryFrom<BroadcastParts> for BroadcastForm {
    type Error = IncompatibleFormError;

    fn try_from(parts: BroadcastParts) -> Result<Self, Self::Error> {
        BroadcastForm::new(parts)
    }
}

impl From<BroadcastForm> for BroadcastParts {
    fn from(form: BroadcastForm) -> Self {
        form.to_parts()
    }
}

// ── Any form ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "form", rename_all = "snake_case")]
pub enum Form {
    MapReduce(MapReduceForm),
    DistributeAggregate(DistributeAggregateForm),
    Broadcast(BroadcastForm),
}

impl Form {
    pub fn from_parts(parts: FormParts) -> Result<Form, IncompatibleFormError> {
        Ok(match parts {
            FormParts::MapReduce(p) => Form::MapReduce(MapReduceForm::new(p)?),
            FormParts::DistributeAggregate(p) => {
                Form::DistributeAggregate(DistributeAggregateForm::new(p)?)
            }
            FormParts::Broadcast(p) => Form::Broadcast(BroadcastForm::new(p)?),
        })
    }

    pub fn template(&self) -> Template {
        match self {
            Form::MapReduce(_) => Template::MapReduce,
            Form::DistributeAggregate(_) => Template::DistributeAggregate,
            Form::Broadcast(_) => Template::Broadcast,
        }
    }

    pub fn type_signature(&self) -> Type {
        match self {
            Form::MapReduce(f) => f.type_signature(),
            Form::DistributeAggregate(f) => f.type_signature(),
            Form::Broadcast(f) => f.type_signature(),
        }
    }

    pub fn slots(&self) -> Vec<(&'static str, &LocalBlock)> {
        match self {
            Form::MapReduce(f) => f.slots(),
            Form::DistributeAggregate(f) => f.slots(),
            Form::Broadcast(f) => f.slots(),
        }
    }

    pub fn as_map_reduce(&self) -> Option<&MapReduceForm> {
        match self {
            Form::MapReduce(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_distribute_aggregate(&self) -> Option<&DistributeAggregateForm> {
        match self {
            Form::DistributeAggregate(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_broadcast(&self) -> Option<&BroadcastForm> {
        match self {
            Form::Broadcast(f) => Some(f),
            _ => None,
        }
    }

    /// Canonical compact JSON.
    pub fn canonical_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// SHA-256 of the canonical JSON.
    pub fn fingerprint(&self) -> serde_json::Result<[u8; 32]> {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_json()?.as_bytes());
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&hasher.finalize());
        Ok(hash)
    }
}

impl fmt::Display for Form {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} form : {}", self.template(), self.type_signature())?;
        for (name, block) in self.slots() {
            writeln!(f, "  {name} = {}", block.payload())?;
        }
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

static EMPTY: Type = Type::Struct(Vec::new());

fn round_type(state: &Type, data: &Type, result: Type) -> Type {
    Type::function(
        Some(Type::tuple(vec![
            Type::federated(state.clone(), Placement::Coordinator, true),
            Type::federated(data.clone(), Placement::Participants, false),
        ])),
        result,
    )
}

fn param_element(block: &LocalBlock, index: usize) -> &Type {
    block
        .parameter_type()
        .and_then(Type::as_struct)
        .and_then(|e| e.get(index))
        .unwrap_or(&EMPTY)
}

fn result_element(block: &LocalBlock, index: usize) -> &Type {
    block
        .result_type()
        .as_struct()
        .and_then(|e| e.get(index))
        .unwrap_or(&EMPTY)
}
