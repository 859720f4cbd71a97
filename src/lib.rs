mod approvers;
mod compile;
mod config;
mod discarders;
mod engine;
mod error;
mod evaluate;
mod loader;
mod operators;
pub mod parse;
mod policy;
mod rate_limiter;
mod types;
mod variables;

pub use approvers::{
    Approver, ApproverDiff, ApproverError, ApproverKind, ApproverValue, Approvers, Capabilities,
};
pub use compile::compile;
pub use config::EngineConfig;
pub use discarders::{Discarder, DiscarderCache, DEFAULT_CAPACITY};
pub use engine::{Engine, EventSink, LoadReport};
pub use error::{LoadError, LoadErrors, VigilError};
pub use loader::{PolicyLoader, PolicySet};
pub use policy::{
    DirectoryProvider, FileProvider, Policy, PolicyProvider, StaticProvider, DEFAULT_POLICY,
    POLICY_EXTENSION,
};
pub use rate_limiter::{RateLimiter, RuleStats, StatsError, StatsSink};
pub use types::{
    field, ident, variable, ActionDefinition, ActionValue, Combine, CompareOp, CompileError,
    EvaluationReport, Event, Expr, FieldError, FieldExpr, FieldRegistry, FieldSpec, FieldValue,
    Limit, Literal, MacroDefinition, MapEvent, OpOverride, Opts, PolicyInfo, Rule, RuleDefinition,
    RuleId, RuleSet, RuleSetBuilder, RuleSetListener, ScalarValue, SetAction, ValueKind,
};
pub use variables::{
    GlobalVariables, KeyedVariables, NoopVariables, Variable, VariableError, VariableProvider,
    VariableProviderFactory,
};
