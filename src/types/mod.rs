mod error;
mod evaluation_report;
mod event;
mod expr;
mod field_registry;
mod opts;
mod rule;
mod ruleset;
mod value;

pub use error::CompileError;
pub use evaluation_report::EvaluationReport;
pub use event::{Event, FieldError, MapEvent};
pub use expr::{field, ident, variable, CompareOp, Expr, FieldExpr, Literal};
pub use field_registry::{FieldRegistry, FieldSpec, OpOverride};
pub use opts::Opts;
pub use rule::{
    ActionDefinition, ActionValue, Combine, Limit, MacroDefinition, PolicyInfo, Rule,
    RuleDefinition, RuleId, SetAction,
};
pub use ruleset::{RuleSet, RuleSetBuilder, RuleSetListener};
pub use value::{FieldValue, ScalarValue, ValueKind};
