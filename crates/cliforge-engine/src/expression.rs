//! Boolean conditions and `{...}` template interpolation.
//!
//! Expressions are evaluated against a scoped environment backed by the
//! execution context: `flags.*` (read-only CLI flags), `steps.<id>.*`
//! (success/error plus named outputs), loop iterator variables, and the
//! helpers `len`, `has`, `starts_with`, `ends_with` and `contains`.
//! The evaluator never mutates the context.
//!
//! Grammar, loosest binding first:
//!   or    := and ( '||' and )*
//!   and   := unary ( '&&' unary )*
//!   unary := '!' unary | cmp
//!   cmp   := primary ( ('=='|'!='|'<='|'>='|'<'|'>'|'~=') primary )?
//!   primary := literal | func '(' args ')' | path | '(' or ')'

use crate::context::ExecutionContext;
use cliforge_core::error::ExpressionError;
use cliforge_core::types::coerce;
use serde_json::{json, Value};

pub struct Evaluator<'a> {
    context: &'a ExecutionContext,
    /// Extra root bindings that shadow the context, used while a step's
    /// own outputs are not yet committed (output mappings, wait polls).
    overlay: std::collections::HashMap<String, Value>,
}

impl<'a> Evaluator<'a> {
    pub fn new(context: &'a ExecutionContext) -> Self {
        Self {
            context,
            overlay: std::collections::HashMap::new(),
        }
    }

    pub fn bind(mut self, name: impl Into<String>, value: Value) -> Self {
        self.overlay.insert(name.into(), value);
        self
    }

    /// Evaluate a guard expression. The empty string is a true guard.
    pub fn evaluate_condition(&self, expression: &str) -> Result<bool, ExpressionError> {
        let expression = expression.trim();
        if expression.is_empty() {
            return Ok(true);
        }
        match self.evaluate(expression)? {
            Value::Bool(b) => Ok(b),
            other => Err(ExpressionError::NotBoolean {
                expression: expression.to_string(),
                actual: other.to_string(),
            }),
        }
    }

    /// Evaluate an expression to a value
    pub fn evaluate(&self, expression: &str) -> Result<Value, ExpressionError> {
        let tokens = tokenize(expression)?;
        let mut parser = Parser {
            expression,
            tokens,
            pos: 0,
        };
        let ast = parser.parse_or()?;
        parser.expect_end()?;
        self.eval(&ast, expression)
    }

    /// Substitute every balanced, non-nested `{...}` span
    pub fn interpolate_string(&self, template: &str) -> Result<String, ExpressionError> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            match rest[start + 1..].find('}') {
                Some(len) => {
                    let inner = &rest[start + 1..start + 1 + len];
                    let value = self.evaluate(inner)?;
                    out.push_str(&coerce::display_string(&value));
                    rest = &rest[start + len + 2..];
                }
                None => {
                    // Unterminated span; keep the remainder literally.
                    out.push_str(&rest[start..]);
                    return Ok(out);
                }
            }
        }
        out.push_str(rest);
        Ok(out)
    }

    /// Interpolate through mappings and sequences; non-string leaves
    /// pass through untouched.
    pub fn interpolate(&self, tree: &Value) -> Result<Value, ExpressionError> {
        match tree {
            Value::String(template) => Ok(Value::String(self.interpolate_string(template)?)),
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.interpolate(item)?);
                }
                Ok(Value::Array(out))
            }
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (key, child) in map {
                    out.insert(key.clone(), self.interpolate(child)?);
                }
                Ok(Value::Object(out))
            }
            other => Ok(other.clone()),
        }
    }

    fn eval(&self, ast: &Ast, expression: &str) -> Result<Value, ExpressionError> {
        match ast {
            Ast::Literal(value) => Ok(value.clone()),
            Ast::Path(segments) => Ok(self.resolve_path(segments)),
            Ast::Not(inner) => {
                let value = self.eval(inner, expression)?;
                Ok(json!(!coerce::truthy(&value)))
            }
            Ast::And(lhs, rhs) => {
                let left = self.eval(lhs, expression)?;
                if !coerce::truthy(&left) {
                    return Ok(json!(false));
                }
                let right = self.eval(rhs, expression)?;
                Ok(json!(coerce::truthy(&right)))
            }
            Ast::Or(lhs, rhs) => {
                let left = self.eval(lhs, expression)?;
                if coerce::truthy(&left) {
                    return Ok(json!(true));
                }
                let right = self.eval(rhs, expression)?;
                Ok(json!(coerce::truthy(&right)))
            }
            Ast::Compare(op, lhs, rhs) => {
                let left = self.eval(lhs, expression)?;
                let right = self.eval(rhs, expression)?;
                compare(*op, &left, &right, expression)
            }
            Ast::Call(name, args) => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg, expression)?);
                }
                call_helper(name, &values, expression)
            }
        }
    }

    fn resolve_path(&self, segments: &[PathSegment]) -> Value {
        let mut segments = segments.iter();
        let root = match segments.next() {
            Some(PathSegment::Key(name)) => name.as_str(),
            _ => return Value::Null,
        };

        let mut current = match root {
            "flags" => json!(self.context.flags().clone()),
            "steps" => match segments.next() {
                Some(PathSegment::Key(step_id)) => self
                    .overlay
                    .get(step_id.as_str())
                    .cloned()
                    .or_else(|| self.context.step_scope(step_id))
                    .unwrap_or(Value::Null),
                _ => return Value::Null,
            },
            name => {
                if let Some(value) = self.overlay.get(name) {
                    value.clone()
                } else if let Some(value) = self.context.get_variable(name) {
                    value
                } else if let Some(scope) = self.context.step_scope(name) {
                    // Short reference form: `{create.id}` = `{steps.create.id}`
                    scope
                } else {
                    return Value::Null;
                }
            }
        };

        for segment in segments {
            current = match segment {
                PathSegment::Key(key) => current.get(key.as_str()).cloned().unwrap_or(Value::Null),
                PathSegment::Index(i) => current.get(*i).cloned().unwrap_or(Value::Null),
            };
        }
        current
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Match,
}

#[derive(Debug, Clone)]
enum PathSegment {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone)]
enum Ast {
    Literal(Value),
    Path(Vec<PathSegment>),
    Call(String, Vec<Ast>),
    Not(Box<Ast>),
    And(Box<Ast>, Box<Ast>),
    Or(Box<Ast>, Box<Ast>),
    Compare(CompareOp, Box<Ast>, Box<Ast>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    True,
    False,
    Null,
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Not,
    And,
    Or,
    Op(CompareOp),
}

fn tokenize(expression: &str) -> Result<Vec<Token>, ExpressionError> {
    let compile_err = |reason: String| ExpressionError::Compile {
        expression: expression.to_string(),
        reason,
    };

    let chars: Vec<char> = expression.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                let mut literal = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            literal.push(ch);
                            i += 1;
                        }
                        None => return Err(compile_err("unterminated string literal".to_string())),
                    }
                }
                tokens.push(Token::Str(literal));
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CompareOp::Eq));
                    i += 2;
                } else {
                    return Err(compile_err("single '=' is not an operator".to_string()));
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CompareOp::Ne));
                    i += 2;
                } else {
                    tokens.push(Token::Not);
                    i += 1;
                }
            }
            '~' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CompareOp::Match));
                    i += 2;
                } else {
                    return Err(compile_err("expected '=' after '~'".to_string()));
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CompareOp::Le));
                    i += 2;
                } else {
                    tokens.push(Token::Op(CompareOp::Lt));
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CompareOp::Ge));
                    i += 2;
                } else {
                    tokens.push(Token::Op(CompareOp::Gt));
                    i += 1;
                }
            }
            '&' => {
                if chars.get(i + 1) == Some(&'&') {
                    tokens.push(Token::And);
                    i += 2;
                } else {
                    return Err(compile_err("expected '&&'".to_string()));
                }
            }
            '|' => {
                if chars.get(i + 1) == Some(&'|') {
                    tokens.push(Token::Or);
                    i += 2;
                } else {
                    return Err(compile_err("expected '||'".to_string()));
                }
            }
            '0'..='9' | '-' => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let raw: String = chars[start..i].iter().collect();
                let number: f64 = raw
                    .parse()
                    .map_err(|_| compile_err(format!("invalid number '{}'", raw)))?;
                tokens.push(Token::Number(number));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '-') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Ident(word),
                });
            }
            other => return Err(compile_err(format!("unexpected character '{}'", other))),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    expression: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn compile_err(&self, reason: String) -> ExpressionError {
        ExpressionError::Compile {
            expression: self.expression.to_string(),
            reason,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), ExpressionError> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            other => Err(self.compile_err(format!("expected {:?}, found {:?}", expected, other))),
        }
    }

    fn expect_end(&self) -> Result<(), ExpressionError> {
        if self.pos == self.tokens.len() {
            Ok(())
        } else {
            Err(self.compile_err(format!("trailing tokens at position {}", self.pos)))
        }
    }

    fn parse_or(&mut self) -> Result<Ast, ExpressionError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.next();
            let right = self.parse_and()?;
            left = Ast::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Ast, ExpressionError> {
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.next();
            let right = self.parse_unary()?;
            left = Ast::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Ast, ExpressionError> {
        if self.peek() == Some(&Token::Not) {
            self.next();
            let inner = self.parse_unary()?;
            return Ok(Ast::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Ast, ExpressionError> {
        let left = self.parse_primary()?;
        if let Some(Token::Op(op)) = self.peek().cloned() {
            self.next();
            let right = self.parse_primary()?;
            return Ok(Ast::Compare(op, Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<Ast, ExpressionError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Ast::Literal(json!(n))),
            Some(Token::Str(s)) => Ok(Ast::Literal(json!(s))),
            Some(Token::True) => Ok(Ast::Literal(json!(true))),
            Some(Token::False) => Ok(Ast::Literal(json!(false))),
            Some(Token::Null) => Ok(Ast::Literal(Value::Null)),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.next();
                    let mut args = Vec::new();
                    if self.peek() != Some(&Token::RParen) {
                        loop {
                            args.push(self.parse_or()?);
                            match self.peek() {
                                Some(Token::Comma) => {
                                    self.next();
                                }
                                _ => break,
                            }
                        }
                    }
                    self.expect(Token::RParen)?;
                    return Ok(Ast::Call(name, args));
                }
                let mut segments = vec![PathSegment::Key(name)];
                loop {
                    match self.peek() {
                        Some(Token::Dot) => {
                            self.next();
                            match self.next() {
                                Some(Token::Ident(key)) => segments.push(PathSegment::Key(key)),
                                other => {
                                    return Err(self.compile_err(format!(
                                        "expected identifier after '.', found {:?}",
                                        other
                                    )))
                                }
                            }
                        }
                        Some(Token::LBracket) => {
                            self.next();
                            match self.next() {
                                Some(Token::Number(n)) if n >= 0.0 && n.fract() == 0.0 => {
                                    segments.push(PathSegment::Index(n as usize));
                                }
                                other => {
                                    return Err(self.compile_err(format!(
                                        "expected index after '[', found {:?}",
                                        other
                                    )))
                                }
                            }
                            self.expect(Token::RBracket)?;
                        }
                        _ => break,
                    }
                }
                Ok(Ast::Path(segments))
            }
            other => Err(self.compile_err(format!("unexpected token {:?}", other))),
        }
    }
}

fn compare(op: CompareOp, left: &Value, right: &Value, expression: &str) -> Result<Value, ExpressionError> {
    let eval_err = |reason: String| ExpressionError::Eval {
        expression: expression.to_string(),
        reason,
    };

    let result = match op {
        CompareOp::Eq => loose_eq(left, right),
        CompareOp::Ne => !loose_eq(left, right),
        CompareOp::Match => {
            let haystack = coerce::display_string(left);
            let needle = coerce::display_string(right);
            haystack.contains(&needle)
        }
        ordering => {
            if let (Some(l), Some(r)) = (coerce::as_f64(left), coerce::as_f64(right)) {
                match ordering {
                    CompareOp::Lt => l < r,
                    CompareOp::Le => l <= r,
                    CompareOp::Gt => l > r,
                    CompareOp::Ge => l >= r,
                    _ => unreachable!("handled above"),
                }
            } else if let (Value::String(l), Value::String(r)) = (left, right) {
                match ordering {
                    CompareOp::Lt => l < r,
                    CompareOp::Le => l <= r,
                    CompareOp::Gt => l > r,
                    CompareOp::Ge => l >= r,
                    _ => unreachable!("handled above"),
                }
            } else {
                return Err(eval_err(format!(
                    "cannot order {} against {}",
                    left, right
                )));
            }
        }
    };
    Ok(json!(result))
}

/// Equality with numeric widening, so `1 == 1.0` holds
fn loose_eq(left: &Value, right: &Value) -> bool {
    if let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) {
        return l == r;
    }
    left == right
}

fn call_helper(name: &str, args: &[Value], expression: &str) -> Result<Value, ExpressionError> {
    let eval_err = |reason: String| ExpressionError::Eval {
        expression: expression.to_string(),
        reason,
    };
    let arg_str = |i: usize| -> Result<&str, ExpressionError> {
        args.get(i)
            .and_then(Value::as_str)
            .ok_or_else(|| eval_err(format!("{}: argument {} must be a string", name, i + 1)))
    };

    match name {
        "len" => {
            let value = args.first().ok_or_else(|| eval_err("len: missing argument".to_string()))?;
            let length = coerce::len(value)
                .ok_or_else(|| eval_err(format!("len: unsupported operand {}", value)))?;
            Ok(json!(length))
        }
        "has" => {
            let map = args.first().ok_or_else(|| eval_err("has: missing map argument".to_string()))?;
            let key = arg_str(1)?;
            match map {
                Value::Object(map) => Ok(json!(map.contains_key(key))),
                Value::Null => Ok(json!(false)),
                other => Err(eval_err(format!("has: not a mapping: {}", other))),
            }
        }
        "starts_with" => Ok(json!(arg_str(0)?.starts_with(arg_str(1)?))),
        "ends_with" => Ok(json!(arg_str(0)?.ends_with(arg_str(1)?))),
        "contains" => {
            let haystack = args.first().ok_or_else(|| eval_err("contains: missing argument".to_string()))?;
            match haystack {
                Value::String(s) => Ok(json!(s.contains(arg_str(1)?))),
                Value::Array(items) => {
                    let needle = args
                        .get(1)
                        .ok_or_else(|| eval_err("contains: missing needle".to_string()))?;
                    Ok(json!(items.iter().any(|item| loose_eq(item, needle))))
                }
                other => Err(eval_err(format!("contains: unsupported operand {}", other))),
            }
        }
        other => Err(eval_err(format!("unknown function '{}'", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::StepResult;
    use std::collections::HashMap;

    fn context_with_flags(pairs: &[(&str, Value)]) -> ExecutionContext {
        let flags = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        ExecutionContext::new(flags)
    }

    #[test]
    fn empty_condition_is_true() {
        let context = ExecutionContext::new(HashMap::new());
        let evaluator = Evaluator::new(&context);
        assert!(evaluator.evaluate_condition("").unwrap());
        assert!(evaluator.evaluate_condition("   ").unwrap());
    }

    #[test]
    fn flag_comparisons() {
        let context = context_with_flags(&[("enabled", json!(true)), ("count", json!(3))]);
        let evaluator = Evaluator::new(&context);
        assert!(evaluator.evaluate_condition("flags.enabled == true").unwrap());
        assert!(evaluator.evaluate_condition("flags.count >= 3").unwrap());
        assert!(!evaluator.evaluate_condition("flags.count > 3").unwrap());
        assert!(evaluator.evaluate_condition("flags.missing == null").unwrap());
    }

    #[test]
    fn step_views_resolve_in_both_forms() {
        let context = ExecutionContext::new(HashMap::new());
        let mut output = HashMap::new();
        output.insert("id".to_string(), json!("r1"));
        context.set_step_result(StepResult::success("create", output));
        let evaluator = Evaluator::new(&context);

        assert_eq!(evaluator.evaluate("steps.create.id").unwrap(), json!("r1"));
        assert_eq!(evaluator.evaluate("create.id").unwrap(), json!("r1"));
        assert!(evaluator.evaluate_condition("steps.create.success").unwrap());
        assert!(!evaluator.evaluate_condition("steps.create.error").unwrap());
    }

    #[test]
    fn variables_shadow_step_views() {
        let context = ExecutionContext::new(HashMap::new());
        context.set_variable("item", json!("volume-2"));
        context.set_variable("item_index", json!(1));
        let evaluator = Evaluator::new(&context);
        assert_eq!(evaluator.evaluate("item").unwrap(), json!("volume-2"));
        assert!(evaluator.evaluate_condition("item_index == 1").unwrap());
    }

    #[test]
    fn boolean_operators_and_grouping() {
        let context = context_with_flags(&[("a", json!(true)), ("b", json!(false))]);
        let evaluator = Evaluator::new(&context);
        assert!(evaluator.evaluate_condition("flags.a && !flags.b").unwrap());
        assert!(evaluator.evaluate_condition("flags.b || flags.a").unwrap());
        assert!(evaluator
            .evaluate_condition("(flags.a || flags.b) && flags.a")
            .unwrap());
    }

    #[test]
    fn helpers() {
        let context = context_with_flags(&[("name", json!("production")), ("tags", json!(["a", "b"]))]);
        let evaluator = Evaluator::new(&context);
        assert!(evaluator.evaluate_condition("len(flags.tags) == 2").unwrap());
        assert!(evaluator.evaluate_condition("has(flags, 'name')").unwrap());
        assert!(evaluator
            .evaluate_condition("starts_with(flags.name, 'prod')")
            .unwrap());
        assert!(evaluator
            .evaluate_condition("ends_with(flags.name, 'tion')")
            .unwrap());
        assert!(evaluator
            .evaluate_condition("contains(flags.name, 'duct')")
            .unwrap());
        assert!(evaluator
            .evaluate_condition("contains(flags.tags, 'b')")
            .unwrap());
    }

    #[test]
    fn match_operator_is_substring_containment() {
        let context = ExecutionContext::new(HashMap::new());
        context.set_variable("event", json!({"data": "{\"state\":\"completed\"}"}));
        let evaluator = Evaluator::new(&context);
        assert!(evaluator.evaluate_condition("event.data ~= 'completed'").unwrap());
        assert!(!evaluator.evaluate_condition("event.data ~= 'failed'").unwrap());
    }

    #[test]
    fn non_boolean_condition_is_an_error() {
        let context = context_with_flags(&[("name", json!("x"))]);
        let evaluator = Evaluator::new(&context);
        assert!(matches!(
            evaluator.evaluate_condition("flags.name"),
            Err(ExpressionError::NotBoolean { .. })
        ));
    }

    #[test]
    fn compile_errors_surface() {
        let context = ExecutionContext::new(HashMap::new());
        let evaluator = Evaluator::new(&context);
        assert!(matches!(
            evaluator.evaluate("flags.a = 1"),
            Err(ExpressionError::Compile { .. })
        ));
        assert!(matches!(
            evaluator.evaluate("'unterminated"),
            Err(ExpressionError::Compile { .. })
        ));
    }

    #[test]
    fn literal_templates_pass_through() {
        let context = ExecutionContext::new(HashMap::new());
        let evaluator = Evaluator::new(&context);
        assert_eq!(evaluator.interpolate_string("literal").unwrap(), "literal");
    }

    #[test]
    fn interpolation_substitutes_spans() {
        let context = context_with_flags(&[("region", json!("eu-1")), ("count", json!(2))]);
        let evaluator = Evaluator::new(&context);
        assert_eq!(
            evaluator
                .interpolate_string("/regions/{flags.region}/nodes?n={flags.count}")
                .unwrap(),
            "/regions/eu-1/nodes?n=2"
        );
    }

    #[test]
    fn interpolation_walks_trees() {
        let context = context_with_flags(&[("name", json!("demo"))]);
        let evaluator = Evaluator::new(&context);
        let tree = json!({
            "title": "{flags.name}",
            "items": ["{flags.name}-0", 7],
            "keep": true,
        });
        let result = evaluator.interpolate(&tree).unwrap();
        assert_eq!(result["title"], json!("demo"));
        assert_eq!(result["items"][0], json!("demo-0"));
        assert_eq!(result["items"][1], json!(7));
        assert_eq!(result["keep"], json!(true));
    }

    #[test]
    fn indexed_paths() {
        let context = context_with_flags(&[("tags", json!(["alpha", "beta"]))]);
        let evaluator = Evaluator::new(&context);
        assert_eq!(evaluator.evaluate("flags.tags[1]").unwrap(), json!("beta"));
    }
}
