/// One `rule` or `macro` definition read from a text policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDefinition {
    pub id: String,
    pub expression: String,
    pub(crate) is_macro: bool,
}

/// The result of parsing a text policy.
#[derive(Debug, Clone, Default)]
pub struct ParsedPolicy {
    pub rules: Vec<ParsedDefinition>,
    pub macros: Vec<ParsedDefinition>,
}
