use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::evaluate::{Node, Operand, VariableRef};
use crate::operators::{mirror, Comparator, OperandKind, StringValues};
use crate::parse::parse_expression;
use crate::types::{
    ActionDefinition, CompareOp, CompileError, Expr, FieldValue, Literal, MacroDefinition,
    OpOverride, Opts, Rule, RuleDefinition, ValueKind,
};
use crate::variables::VariableProvider;

/// Everything a rule can refer to besides its own text: the options, the
/// parsed macros, the variables declared by `set` actions and the scope
/// providers instantiated for one rule set.
pub(crate) struct Environment {
    pub(crate) opts: Opts,
    pub(crate) macros: HashMap<String, Expr>,
    pub(crate) declared: HashMap<String, ValueKind>,
    pub(crate) scopes: HashMap<String, Arc<dyn VariableProvider>>,
}

impl Environment {
    pub(crate) fn new(opts: Opts) -> Self {
        let scopes = opts
            .scopes
            .iter()
            .map(|(name, factory)| (name.clone(), factory()))
            .collect();
        Self {
            opts,
            macros: HashMap::new(),
            declared: HashMap::new(),
            scopes,
        }
    }

    /// Parse and register a macro.
    pub(crate) fn add_macro(&mut self, definition: &MacroDefinition) -> Result<(), CompileError> {
        let body = definition.body()?;
        self.macros.insert(definition.id.clone(), body);
        Ok(())
    }

    /// Record the variables a rule's `set` actions write.
    pub(crate) fn declare_actions(&mut self, definition: &RuleDefinition) {
        for action in &definition.actions {
            let ActionDefinition::Set(set) = action;
            self.declared
                .entry(set.variable_name())
                .or_insert_with(|| set.kind());
        }
    }

    pub(crate) fn provider(&self, scope: Option<&str>) -> Option<Arc<dyn VariableProvider>> {
        match scope {
            Some(scope) => self.scopes.get(scope).map(Arc::clone),
            None => Some(Arc::clone(&self.opts.globals)),
        }
    }
}

/// Compile one rule definition against `opts` and `macros`.
///
/// # Errors
///
/// Returns [`CompileError`] for malformed expressions, unresolved
/// identifiers, type mismatches and recursive macros.
///
/// # Example
///
/// ```
/// use vigil::{compile, FieldRegistry, MacroDefinition, Opts, RuleDefinition, ValueKind};
///
/// let opts = Opts::new(FieldRegistry::new().field("open.filename", ValueKind::String));
/// let macros = [MacroDefinition::values("secrets", ["/etc/shadow", "/etc/gshadow"])];
/// let rule = compile(
///     &RuleDefinition::new("secret_open", "open.filename in secrets"),
///     &opts,
///     &macros,
/// )
/// .unwrap();
/// assert_eq!(rule.event_type(), "open");
/// ```
pub fn compile(
    definition: &RuleDefinition,
    opts: &Opts,
    macros: &[MacroDefinition],
) -> Result<Rule, CompileError> {
    let mut env = Environment::new(opts.clone());
    for def in macros {
        env.add_macro(def)?;
    }
    env.declare_actions(definition);
    compile_rule(&env, definition)
}

pub(crate) fn compile_rule(
    env: &Environment,
    definition: &RuleDefinition,
) -> Result<Rule, CompileError> {
    let expr = parse_expression(&definition.expression)?;
    let node = Compiler::new(env).boolean(&expr)?;

    let mut fields = BTreeSet::new();
    node.collect_fields(&mut fields);

    let event_types: Vec<&str> = fields
        .iter()
        .filter_map(|f| env.opts.registry.get(f)?.event_type.as_deref())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let event_type = match event_types.as_slice() {
        [] => return Err(CompileError::NoEventType),
        [single] => (*single).to_owned(),
        many => {
            return Err(CompileError::MultipleEventTypes {
                event_types: many.iter().map(|s| (*s).to_owned()).collect(),
            })
        }
    };

    for action in &definition.actions {
        let ActionDefinition::Set(set) = action;
        if let Some(scope) = &set.scope {
            if !env.scopes.contains_key(scope) {
                return Err(CompileError::UnknownScope {
                    scope: scope.clone(),
                    name: set.variable_name(),
                });
            }
        }
    }

    Ok(Rule {
        definition: definition.clone(),
        node,
        event_type,
        fields,
    })
}

struct Compiler<'a> {
    env: &'a Environment,
    /// Macros being inlined, outermost first.
    stack: Vec<String>,
}

impl<'a> Compiler<'a> {
    fn new(env: &'a Environment) -> Self {
        Self {
            env,
            stack: Vec::new(),
        }
    }

    fn boolean(&mut self, expr: &Expr) -> Result<Node, CompileError> {
        match expr {
            Expr::And(a, b) => Ok(Node::And(
                Box::new(self.boolean(a)?),
                Box::new(self.boolean(b)?),
            )),
            Expr::Or(a, b) => Ok(Node::Or(
                Box::new(self.boolean(a)?),
                Box::new(self.boolean(b)?),
            )),
            Expr::Not(inner) => Ok(Node::Not(Box::new(self.boolean(inner)?))),
            Expr::Compare { lhs, op, rhs } => self.compare(expr, lhs, *op, rhs),
            Expr::Literal(_) | Expr::Array(_) | Expr::Ident(_) | Expr::Variable(_) => {
                match self.operand(expr)? {
                    Operand::Node(node) => Ok(*node),
                    Operand::Value(FieldValue::Bool(b)) => Ok(Node::Const(b)),
                    operand if operand.kind() == OperandKind::Bool => Ok(Node::Truthy(operand)),
                    _ => Err(CompileError::NotBoolean {
                        expression: expr.to_string(),
                    }),
                }
            }
        }
    }

    fn operand(&mut self, expr: &Expr) -> Result<Operand, CompileError> {
        match expr {
            Expr::Literal(lit) => literal(lit),
            Expr::Array(items) => self.array(expr, items),
            Expr::Ident(name) => self.ident(name),
            Expr::Variable(name) => self.variable(name).map(Operand::Variable),
            Expr::Compare { .. } | Expr::And(..) | Expr::Or(..) | Expr::Not(_) => {
                Ok(Operand::Node(Box::new(self.boolean(expr)?)))
            }
        }
    }

    /// Identifiers resolve to a macro, then a constant, then a field.
    fn ident(&mut self, name: &str) -> Result<Operand, CompileError> {
        let env = self.env;

        if let Some(body) = env.macros.get(name) {
            if let Some(start) = self.stack.iter().position(|m| m == name) {
                let mut path = self.stack[start..].to_vec();
                path.push(name.to_owned());
                return Err(CompileError::RecursiveMacro { path });
            }
            self.stack.push(name.to_owned());
            let result = self.operand(body);
            self.stack.pop();
            return result;
        }

        if let Some(value) = env.opts.constants.get(name) {
            return Ok(constant(value));
        }

        if let Some(spec) = env.opts.registry.get(name) {
            return Ok(Operand::Field {
                name: name.to_owned(),
                kind: spec.kind,
                fold_case: spec.op_override == Some(OpOverride::CaseInsensitive),
            });
        }

        Err(CompileError::UnknownIdentifier {
            name: name.to_owned(),
        })
    }

    fn variable(&self, name: &str) -> Result<VariableRef, CompileError> {
        let env = self.env;

        if let Some(variable) = env.opts.variables.get(name) {
            return Ok(VariableRef::Computed {
                name: name.to_owned(),
                variable: variable.clone(),
            });
        }

        let unknown = || CompileError::UnknownVariable {
            name: name.to_owned(),
        };

        if let Some((scope, key)) = name.split_once('.') {
            if let Some(provider) = env.scopes.get(scope) {
                let kind = *env.declared.get(name).ok_or_else(unknown)?;
                return Ok(VariableRef::Stored {
                    name: name.to_owned(),
                    key: key.to_owned(),
                    kind,
                    provider: Arc::clone(provider),
                });
            }
            if !env.declared.contains_key(name) {
                return Err(CompileError::UnknownScope {
                    scope: scope.to_owned(),
                    name: name.to_owned(),
                });
            }
        }

        let kind = *env.declared.get(name).ok_or_else(unknown)?;
        Ok(VariableRef::Stored {
            name: name.to_owned(),
            key: name.to_owned(),
            kind,
            provider: Arc::clone(&env.opts.globals),
        })
    }

    fn array(&mut self, expr: &Expr, items: &[Expr]) -> Result<Operand, CompileError> {
        let mut strings = StringValues::new();
        let mut ints = Vec::new();

        for item in items {
            match self.operand(item)? {
                Operand::Value(FieldValue::String(s)) => strings.insert(&s),
                Operand::Value(FieldValue::Int(i)) => ints.push(i),
                Operand::Strings(values) => strings.extend(values),
                Operand::Ints(values) => ints.extend(values),
                Operand::Value(other) => {
                    return Err(CompileError::TypeMismatch {
                        operator: "[]".into(),
                        expected: "string or int".into(),
                        found: other.kind().to_string(),
                        expression: item.to_string(),
                    })
                }
                Operand::Field { .. } | Operand::Variable(_) | Operand::Node(_) => {
                    return Err(CompileError::NotConstant {
                        expression: item.to_string(),
                    })
                }
            }
        }

        match (strings.is_empty(), ints.is_empty()) {
            (_, true) => Ok(Operand::Strings(strings)),
            (true, false) => Ok(Operand::Ints(ints)),
            (false, false) => Err(CompileError::TypeMismatch {
                operator: "[]".into(),
                expected: "items of one kind".into(),
                found: "strings and ints".into(),
                expression: expr.to_string(),
            }),
        }
    }

    fn compare(
        &mut self,
        expr: &Expr,
        lhs: &Expr,
        op: CompareOp,
        rhs: &Expr,
    ) -> Result<Node, CompileError> {
        let mut lhs = self.operand(lhs)?;
        let mut rhs = self.operand(rhs)?;
        let mut op = op;

        // `=~ "/etc/*"` takes a glob even without the `~` marker.
        if matches!(op, CompareOp::Matches | CompareOp::NotMatches) {
            if let Operand::Value(FieldValue::String(s)) = &rhs {
                let mut values = StringValues::new();
                values.push_glob(s).map_err(|e| invalid_pattern(s, &e))?;
                rhs = Operand::Strings(values);
            }
        }

        if lhs.is_constant() && !rhs.is_constant() {
            if let Some(mirrored) = mirror(op) {
                std::mem::swap(&mut lhs, &mut rhs);
                op = mirrored;
            }
        }

        let fold_case = lhs.fold_case() || rhs.fold_case();
        if fold_case {
            lhs = fold(lhs)?;
            rhs = fold(rhs)?;
        }

        let cmp = Comparator::resolve(op, lhs.kind(), rhs.kind(), fold_case).ok_or_else(|| {
            CompileError::TypeMismatch {
                operator: op.to_string(),
                expected: expected_operand(op, lhs.kind()).to_owned(),
                found: rhs.kind().to_string(),
                expression: expr.to_string(),
            }
        })?;

        let node = Node::Compare { op, lhs, rhs, cmp };
        Ok(match node.constant_value() {
            Some(b) => Node::Const(b),
            None => node,
        })
    }
}

fn literal(lit: &Literal) -> Result<Operand, CompileError> {
    Ok(match lit {
        Literal::Int(v) => Operand::Value(FieldValue::Int(*v)),
        Literal::Bool(v) => Operand::Value(FieldValue::Bool(*v)),
        Literal::String(v) => Operand::Value(FieldValue::String(v.clone())),
        Literal::Pattern(p) => {
            let mut values = StringValues::new();
            values.push_glob(p).map_err(|e| invalid_pattern(p, &e))?;
            Operand::Strings(values)
        }
        Literal::Regex(r) => {
            let mut values = StringValues::new();
            values.push_regex(r).map_err(|e| invalid_pattern(r, &e))?;
            Operand::Strings(values)
        }
    })
}

fn constant(value: &FieldValue) -> Operand {
    match value {
        FieldValue::StringArray(_) | FieldValue::StringSet(_) => {
            let mut values = StringValues::new();
            for s in value.strings() {
                values.insert(s);
            }
            Operand::Strings(values)
        }
        FieldValue::Bool(_) | FieldValue::Int(_) | FieldValue::String(_) => {
            Operand::Value(value.clone())
        }
    }
}

fn fold(operand: Operand) -> Result<Operand, CompileError> {
    match operand {
        Operand::Strings(values) => values
            .folded()
            .map(Operand::Strings)
            .map_err(|e| invalid_pattern(&values.to_string(), &e)),
        Operand::Value(FieldValue::String(s)) => Ok(Operand::Value(FieldValue::String(
            s.to_lowercase(),
        ))),
        other => Ok(other),
    }
}

fn invalid_pattern(pattern: &str, err: &regex::Error) -> CompileError {
    CompileError::InvalidPattern {
        pattern: pattern.to_owned(),
        reason: err.to_string(),
    }
}

fn expected_operand(op: CompareOp, lhs: OperandKind) -> &'static str {
    use CompareOp as Op;
    use OperandKind as K;

    match (op, lhs) {
        (Op::Eq | Op::Neq, K::Bool) => "bool",
        (Op::Eq | Op::Neq | Op::Lt | Op::Lte | Op::Gt | Op::Gte, K::Int) => "int",
        (Op::In | Op::NotIn, K::Int) => "int list",
        (Op::Eq | Op::Neq, K::String | K::StringArray) => "string or pattern",
        (Op::In | Op::NotIn, K::String) => "string set or string array",
        (Op::In | Op::NotIn, K::StringArray) => "string set",
        (Op::Matches | Op::NotMatches, K::String | K::StringArray) => "pattern",
        (Op::Lt | Op::Lte | Op::Gt | Op::Gte, _) => "int operands",
        _ => "comparable operands",
    }
}
