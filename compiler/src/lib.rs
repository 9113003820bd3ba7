// mrfc — MapReduce form compiler
//
// Library root. Core IR and compiler first, then the textual front end and
// the pass runner used by the binary.

pub mod types;
pub mod error;
pub mod names;
pub mod ir;
pub mod intrinsics;
pub mod placement;
pub mod local_block;
pub mod region;
pub mod context;
pub mod matcher;
pub mod forms;
pub mod validate;
pub mod synthesize;
pub mod compile;
pub mod eval;
pub mod release;

pub mod lexer;
pub mod ast;
pub mod parser;
pub mod elaborate;
pub mod diag;
pub mod pass;
pub mod pipeline;

pub use compile::{check_compatible, compile, extract_state_initialization};
pub use forms::{DistributeAggregateForm, Form, MapReduceForm, Template};
pub use synthesize::synthesize;
