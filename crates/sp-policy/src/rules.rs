//! Rule language
//!
//! A rule file is a YAML document:
//!
//! ```yaml
//! mode: first_match          # or `collect`
//! default:
//!   value: development
//! rules:
//!   - name: prod-namespaces
//!     when:
//!       any:
//!         - prefix: { path: namespace.name, value: prod- }
//!         - equals: { path: 'namespace.labels["kubernaut.ai/environment"]', value: production }
//!     then:
//!       value: production
//!     confidence: 0.95
//! ```
//!
//! Operators: `all`, `any`, `not`, `equals`, `in`, `exists`, `matches`
//! (regex) and `prefix`. Paths are dotted; keys containing dots or slashes
//! use the bracket form `labels["app.kubernetes.io/name"]`. A rule without
//! `when` always matches. `then` carries either a literal `value` or a
//! `from` path copied out of the input, and an optional `key` for domains
//! that produce keyed outputs.
//!
//! Files are compiled once at load: paths are parsed, regexes built under a
//! size limit and nesting depth bounded, so evaluation never fails on
//! syntax.

use crate::bundle::PolicyDomain;
use crate::error::{PolicyError, Result};
use crate::sandbox::Meter;
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use serde_json::Value;
use std::borrow::Cow;
use std::fmt;

/// Maximum nesting depth of a `when` expression
pub const MAX_EXPR_DEPTH: usize = 32;

/// Compiled size limit for a single regex
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// How matching rules produce output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Output of the first matching rule
    #[default]
    FirstMatch,
    /// Outputs of every matching rule, in order
    Collect,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleSetSpec {
    #[serde(default)]
    mode: MatchMode,
    #[serde(default)]
    default: Option<OutputSpec>,
    #[serde(default)]
    rules: Vec<RuleSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleSpec {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    when: Option<ExprSpec>,
    then: OutputSpec,
    #[serde(default)]
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct OutputSpec {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    from: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ExprSpec {
    All(Vec<ExprSpec>),
    Any(Vec<ExprSpec>),
    Not(Box<ExprSpec>),
    Equals { path: String, value: Value },
    In { path: String, values: Vec<Value> },
    Exists(String),
    Matches { path: String, pattern: String },
    Prefix { path: String, value: String },
}

/// Parsed path into the input document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    /// Parse dotted / bracketed path syntax
    ///
    /// # Errors
    /// Returns a message describing the first syntax problem.
    pub fn parse(raw: &str) -> std::result::Result<Self, String> {
        let mut segments = Vec::new();
        let mut current = String::new();
        let mut chars = raw.chars();
        // Set by a dot until the next segment starts
        let mut expect_segment = false;
        let mut after_bracket = false;

        while let Some(c) = chars.next() {
            match c {
                '.' => {
                    if !current.is_empty() {
                        segments.push(std::mem::take(&mut current));
                    } else if !after_bracket {
                        return Err(format!("empty segment in path '{raw}'"));
                    }
                    expect_segment = true;
                    after_bracket = false;
                }
                '[' => {
                    if !current.is_empty() {
                        segments.push(std::mem::take(&mut current));
                    } else if expect_segment {
                        return Err(format!("empty segment in path '{raw}'"));
                    }
                    if chars.next() != Some('"') {
                        return Err(format!("expected '\"' after '[' in path '{raw}'"));
                    }
                    let mut quoted = String::new();
                    loop {
                        match chars.next() {
                            Some('"') => break,
                            Some(ch) => quoted.push(ch),
                            None => return Err(format!("unterminated '[\"' in path '{raw}'")),
                        }
                    }
                    if chars.next() != Some(']') {
                        return Err(format!("expected ']' in path '{raw}'"));
                    }
                    if quoted.is_empty() {
                        return Err(format!("empty segment in path '{raw}'"));
                    }
                    segments.push(quoted);
                    expect_segment = false;
                    after_bracket = true;
                }
                _ => {
                    current.push(c);
                    expect_segment = false;
                    after_bracket = false;
                }
            }
        }
        if expect_segment {
            return Err(format!("trailing '.' in path '{raw}'"));
        }
        if !current.is_empty() {
            segments.push(current);
        }
        if segments.is_empty() {
            return Err("empty path".to_string());
        }
        Ok(Self { segments })
    }

    /// Resolve against a document; `None` when any segment is absent
    #[must_use]
    pub fn resolve<'a>(&self, doc: &'a Value) -> Option<&'a Value> {
        self.segments.iter().try_fold(doc, |node, seg| match node {
            Value::Object(map) => map.get(seg),
            Value::Array(items) => seg.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.segments.iter().enumerate() {
            if seg.contains(['.', '/', '[', ']']) {
                write!(f, "[\"{seg}\"]")?;
            } else {
                if i > 0 {
                    f.write_str(".")?;
                }
                f.write_str(seg)?;
            }
        }
        Ok(())
    }
}

/// Compiled condition
#[derive(Debug, Clone)]
pub(crate) enum Expr {
    Always,
    All(Vec<Expr>),
    Any(Vec<Expr>),
    Not(Box<Expr>),
    Equals(FieldPath, Value),
    In(FieldPath, Vec<Value>),
    Exists(FieldPath),
    Matches(FieldPath, Regex),
    Prefix(FieldPath, String),
}

impl Expr {
    fn compile(spec: ExprSpec, depth: usize) -> std::result::Result<Self, String> {
        if depth > MAX_EXPR_DEPTH {
            return Err(format!("expression nested deeper than {MAX_EXPR_DEPTH}"));
        }
        let compile_all = |items: Vec<ExprSpec>| {
            items
                .into_iter()
                .map(|e| Self::compile(e, depth + 1))
                .collect::<std::result::Result<Vec<_>, _>>()
        };
        Ok(match spec {
            ExprSpec::All(items) => Self::All(compile_all(items)?),
            ExprSpec::Any(items) => Self::Any(compile_all(items)?),
            ExprSpec::Not(inner) => Self::Not(Box::new(Self::compile(*inner, depth + 1)?)),
            ExprSpec::Equals { path, value } => Self::Equals(FieldPath::parse(&path)?, value),
            ExprSpec::In { path, values } => Self::In(FieldPath::parse(&path)?, values),
            ExprSpec::Exists(path) => Self::Exists(FieldPath::parse(&path)?),
            ExprSpec::Matches { path, pattern } => {
                let regex = RegexBuilder::new(&pattern)
                    .size_limit(REGEX_SIZE_LIMIT)
                    .build()
                    .map_err(|e| format!("invalid regex '{pattern}': {e}"))?;
                Self::Matches(FieldPath::parse(&path)?, regex)
            }
            ExprSpec::Prefix { path, value } => Self::Prefix(FieldPath::parse(&path)?, value),
        })
    }

    /// Evaluate against the input, charging the meter per node
    pub(crate) fn eval(&self, input: &Value, meter: &mut Meter) -> Result<bool> {
        meter.step()?;
        match self {
            Self::Always => Ok(true),
            Self::All(items) => {
                for item in items {
                    if !item.eval(input, meter)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Any(items) => {
                for item in items {
                    if item.eval(input, meter)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Self::Not(inner) => Ok(!inner.eval(input, meter)?),
            Self::Equals(path, expected) => {
                Ok(path.resolve(input).is_some_and(|v| loose_eq(v, expected)))
            }
            Self::In(path, options) => Ok(path
                .resolve(input)
                .is_some_and(|v| options.iter().any(|o| loose_eq(v, o)))),
            Self::Exists(path) => Ok(path.resolve(input).is_some_and(|v| !v.is_null())),
            Self::Matches(path, regex) => match path.resolve(input).and_then(scalar_text) {
                Some(text) => {
                    meter.charge(text.len())?;
                    Ok(regex.is_match(&text))
                }
                None => Ok(false),
            },
            Self::Prefix(path, prefix) => Ok(path
                .resolve(input)
                .and_then(scalar_text)
                .is_some_and(|text| text.starts_with(prefix.as_str()))),
        }
    }
}

/// Equality that treats scalars by their text form, so `"1"` equals `1`
fn loose_eq(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    match (scalar_text(actual), scalar_text(expected)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn scalar_text(value: &Value) -> Option<Cow<'_, str>> {
    match value {
        Value::String(s) => Some(Cow::Borrowed(s.as_str())),
        Value::Number(n) => Some(Cow::Owned(n.to_string())),
        Value::Bool(b) => Some(Cow::Owned(b.to_string())),
        _ => None,
    }
}

/// Approximate heap footprint of a JSON value
#[must_use]
pub fn value_size(value: &Value) -> usize {
    match value {
        Value::Null | Value::Bool(_) => 1,
        Value::Number(_) => 8,
        Value::String(s) => s.len(),
        Value::Array(items) => 16 + items.iter().map(value_size).sum::<usize>(),
        Value::Object(map) => {
            16 + map
                .iter()
                .map(|(k, v)| k.len() + value_size(v))
                .sum::<usize>()
        }
    }
}

/// Where a rule's output comes from
#[derive(Debug, Clone)]
pub(crate) enum OutputSource {
    Literal(Value),
    From(FieldPath),
}

/// Compiled `then` clause
#[derive(Debug, Clone)]
pub(crate) struct Output {
    pub(crate) key: Option<String>,
    pub(crate) source: OutputSource,
}

impl Output {
    fn compile(spec: OutputSpec) -> std::result::Result<Self, String> {
        let source = match (spec.value, spec.from) {
            (Some(value), None) => OutputSource::Literal(value),
            (None, Some(from)) => OutputSource::From(FieldPath::parse(&from)?),
            (Some(_), Some(_)) => return Err("output sets both 'value' and 'from'".into()),
            (None, None) => return Err("output needs 'value' or 'from'".into()),
        };
        Ok(Self {
            key: spec.key,
            source,
        })
    }

    /// Produce the output value; `None` when a `from` path is absent
    pub(crate) fn produce(&self, input: &Value, meter: &mut Meter) -> Result<Option<Value>> {
        let value = match &self.source {
            OutputSource::Literal(v) => Some(v.clone()),
            OutputSource::From(path) => path.resolve(input).filter(|v| !v.is_null()).cloned(),
        };
        if let Some(v) = &value {
            meter.charge(value_size(v))?;
        }
        Ok(value)
    }
}

/// Compiled rule
#[derive(Debug, Clone)]
pub(crate) struct Rule {
    pub(crate) name: String,
    pub(crate) when: Expr,
    pub(crate) then: Output,
    pub(crate) confidence: Option<f64>,
}

/// Compiled rule set for one domain
#[derive(Debug, Clone)]
pub struct CompiledRuleSet {
    domain: PolicyDomain,
    pub(crate) mode: MatchMode,
    pub(crate) default: Option<Output>,
    pub(crate) rules: Vec<Rule>,
}

impl CompiledRuleSet {
    /// Parse and compile a YAML rule file
    ///
    /// # Errors
    /// `PolicyError::InvalidRuleSet` on any syntax or compile problem.
    pub fn from_yaml(domain: PolicyDomain, source: &str) -> Result<Self> {
        // Going through a JSON value lets operators write single-key maps
        // (`equals: {...}`) rather than YAML tags for operators.
        let doc: Value = serde_yaml::from_str(source)
            .map_err(|e| PolicyError::invalid(domain, format!("yaml: {e}")))?;
        if doc.is_null() {
            return Err(PolicyError::invalid(domain, "empty rule file"));
        }
        let spec: RuleSetSpec = serde_json::from_value(doc)
            .map_err(|e| PolicyError::invalid(domain, e.to_string()))?;
        Self::compile(domain, spec)
    }

    fn compile(domain: PolicyDomain, spec: RuleSetSpec) -> Result<Self> {
        let default = spec
            .default
            .map(Output::compile)
            .transpose()
            .map_err(|e| PolicyError::invalid(domain, format!("default: {e}")))?;

        let mut rules = Vec::with_capacity(spec.rules.len());
        for (index, rule) in spec.rules.into_iter().enumerate() {
            let name = rule.name.unwrap_or_else(|| format!("rule-{index}"));
            let context = |e: String| PolicyError::invalid(domain, format!("rule '{name}': {e}"));

            if let Some(c) = rule.confidence {
                if !(0.0..=1.0).contains(&c) {
                    return Err(context(format!("confidence {c} outside [0, 1]")));
                }
            }
            let when = match rule.when {
                Some(expr) => Expr::compile(expr, 1).map_err(context)?,
                None => Expr::Always,
            };
            let then = Output::compile(rule.then).map_err(context)?;
            rules.push(Rule {
                name,
                when,
                then,
                confidence: rule.confidence,
            });
        }

        Ok(Self {
            domain,
            mode: spec.mode,
            default,
            rules,
        })
    }

    /// Domain this rule set serves
    #[inline]
    #[must_use]
    pub fn domain(&self) -> PolicyDomain {
        self.domain
    }

    /// Match mode
    #[inline]
    #[must_use]
    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    /// Number of rules
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether there are no rules
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether a default output is declared
    #[inline]
    #[must_use]
    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }
}
