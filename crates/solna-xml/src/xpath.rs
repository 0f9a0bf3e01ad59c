#![forbid(unsafe_code)]

//! XPath subset for XML-DSig processing.
//!
//! Covers what signature transforms and same-document references use in
//! practice:
//! - location paths over the `child`, `descendant`, `descendant-or-self`,
//!   `self`, `parent`, `ancestor`, `ancestor-or-self`, `following-sibling`,
//!   `preceding-sibling` and `attribute` axes, with the usual abbreviations
//! - node tests `name`, `prefix:name`, `*`, `prefix:*`, `node()`, `text()`,
//!   `comment()`
//! - predicates, positional or boolean
//! - `|`, `and`, `or`, `=`, `!=`
//! - `not()`, `true()`, `false()`, `count()`, `position()`, `last()`,
//!   `id()` and the XML-DSig `here()` function

use solna_core::{Error, Result};
use std::collections::{BTreeSet, HashMap};

/// Parse a same-document reference (e.g., `#foo` → `foo`).
pub fn parse_same_document_ref(uri: &str) -> Option<&str> {
    uri.strip_prefix('#')
}

/// Parse an `xpointer(id('...'))` expression and return the ID value.
pub fn parse_xpointer_id(expr: &str) -> Option<&str> {
    let inner = expr
        .strip_prefix("xpointer(id(")?
        .strip_suffix("))")?
        .trim();
    inner
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| inner.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
}

/// Evaluation context: namespace bindings for prefixes in the expression,
/// registered IDs, and the node `here()` returns.
pub struct XPathContext<'a, 'input> {
    doc: &'a roxmltree::Document<'input>,
    namespaces: HashMap<String, String>,
    ids: HashMap<String, roxmltree::NodeId>,
    here: Option<roxmltree::NodeId>,
}

impl<'a, 'input> XPathContext<'a, 'input> {
    pub fn new(doc: &'a roxmltree::Document<'input>) -> Self {
        Self {
            doc,
            namespaces: HashMap::new(),
            ids: HashMap::new(),
            here: None,
        }
    }

    pub fn with_namespaces(mut self, namespaces: HashMap<String, String>) -> Self {
        self.namespaces = namespaces;
        self
    }

    pub fn with_ids(mut self, ids: HashMap<String, roxmltree::NodeId>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_here(mut self, here: Option<roxmltree::NodeId>) -> Self {
        self.here = here;
        self
    }

    fn resolve_prefix(&self, prefix: &str) -> Result<&str> {
        self.namespaces
            .get(prefix)
            .map(String::as_str)
            .ok_or_else(|| Error::Transform(format!("XPath: unbound prefix '{prefix}'")))
    }
}

/// A compiled XPath expression.
#[derive(Debug, Clone)]
pub struct XPath {
    source: String,
    expr: Expr,
}

impl XPath {
    pub fn parse(source: &str) -> Result<Self> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        if parser.pos != parser.tokens.len() {
            return Err(Error::Transform(format!(
                "XPath: unexpected trailing input in '{source}'"
            )));
        }
        Ok(Self {
            source: source.to_owned(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate as a node-set with `node` as the context node.
    pub fn select(
        &self,
        ctx: &XPathContext<'_, '_>,
        node: roxmltree::Node<'_, '_>,
    ) -> Result<BTreeSet<usize>> {
        match self.eval_at(ctx, node)? {
            Value::Nodes(nodes) => Ok(nodes),
            _ => Err(Error::Transform(format!(
                "XPath: '{}' does not evaluate to a node-set",
                self.source
            ))),
        }
    }

    /// Evaluate as a boolean with `node` as the context node.
    pub fn matches(
        &self,
        ctx: &XPathContext<'_, '_>,
        node: roxmltree::Node<'_, '_>,
    ) -> Result<bool> {
        Ok(self.eval_at(ctx, node)?.to_bool())
    }

    fn eval_at(&self, ctx: &XPathContext<'_, '_>, node: roxmltree::Node<'_, '_>) -> Result<Value> {
        let context = ctx
            .doc
            .get_node(node.id())
            .ok_or_else(|| Error::Transform("XPath: context node not in document".into()))?;
        let mut eval = Evaluator { ctx };
        eval.eval(
            &self.expr,
            Focus {
                node: context,
                position: 1,
                size: 1,
            },
        )
    }
}

// ── Tokens ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Slash,
    DoubleSlash,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Pipe,
    At,
    Dot,
    DotDot,
    ColonColon,
    Comma,
    Eq,
    NotEq,
    Star,
    Literal(String),
    Number(f64),
    Name(String),
}

fn tokenize(src: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '/' if chars.get(i + 1) == Some(&'/') => {
                tokens.push(Token::DoubleSlash);
                i += 2;
            }
            '/' => {
                tokens.push(Token::Slash);
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
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            '@' => {
                tokens.push(Token::At);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Eq);
                i += 1;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::NotEq);
                i += 2;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            ':' if chars.get(i + 1) == Some(&':') => {
                tokens.push(Token::ColonColon);
                i += 2;
            }
            '.' if chars.get(i + 1) == Some(&'.') => {
                tokens.push(Token::DotDot);
                i += 2;
            }
            '.' if !chars.get(i + 1).is_some_and(|c| c.is_ascii_digit()) => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '\'' | '"' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&ch| ch == c)
                    .ok_or_else(|| Error::Transform("XPath: unterminated literal".into()))?;
                tokens.push(Token::Literal(chars[i + 1..i + 1 + end].iter().collect()));
                i += end + 2;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse()
                    .map_err(|_| Error::Transform(format!("XPath: bad number '{text}'")))?;
                tokens.push(Token::Number(n));
            }
            c if is_name_start(c) => {
                let start = i;
                while i < chars.len() && is_name_char(chars[i]) {
                    i += 1;
                }
                // prefix:local or prefix:*, but not the axis separator.
                if chars.get(i) == Some(&':') && chars.get(i + 1) != Some(&':') {
                    if chars.get(i + 1) == Some(&'*') {
                        i += 2;
                    } else if chars.get(i + 1).is_some_and(|c| is_name_start(*c)) {
                        i += 1;
                        while i < chars.len() && is_name_char(chars[i]) {
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Name(chars[start..i].iter().collect()));
            }
            other => {
                return Err(Error::Transform(format!(
                    "XPath: unexpected character '{other}'"
                )))
            }
        }
    }
    Ok(tokens)
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-' || c == '.'
}

// ── AST ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Equals {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        negate: bool,
    },
    Union(Box<Expr>, Box<Expr>),
    Path {
        absolute: bool,
        steps: Vec<Step>,
    },
    /// A primary expression followed by a relative path (`id('x')/a`).
    Filter {
        primary: Box<Expr>,
        steps: Vec<Step>,
    },
    Call(Function, Vec<Expr>),
    Literal(String),
    Number(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Function {
    Not,
    True,
    False,
    Count,
    Position,
    Last,
    Id,
    Here,
}

#[derive(Debug, Clone)]
struct Step {
    axis: Axis,
    test: NodeTest,
    predicates: Vec<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
    DescendantOrSelf,
    SelfAxis,
    Parent,
    Ancestor,
    AncestorOrSelf,
    FollowingSibling,
    PrecedingSibling,
    Attribute,
}

impl Axis {
    fn from_name(name: &str) -> Result<Self> {
        Ok(match name {
            "child" => Self::Child,
            "descendant" => Self::Descendant,
            "descendant-or-self" => Self::DescendantOrSelf,
            "self" => Self::SelfAxis,
            "parent" => Self::Parent,
            "ancestor" => Self::Ancestor,
            "ancestor-or-self" => Self::AncestorOrSelf,
            "following-sibling" => Self::FollowingSibling,
            "preceding-sibling" => Self::PrecedingSibling,
            "attribute" => Self::Attribute,
            other => return Err(Error::Transform(format!("XPath: unsupported axis '{other}'"))),
        })
    }

    fn is_reverse(self) -> bool {
        matches!(
            self,
            Self::Parent | Self::Ancestor | Self::AncestorOrSelf | Self::PrecedingSibling
        )
    }
}

#[derive(Debug, Clone)]
enum NodeTest {
    Name { prefix: Option<String>, local: String },
    AnyName { prefix: Option<String> },
    Node,
    Text,
    Comment,
}

// ── Parser ───────────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expect(&mut self, want: Token) -> Result<()> {
        match self.next() {
            Some(t) if t == want => Ok(()),
            other => Err(Error::Transform(format!(
                "XPath: expected {want:?}, found {other:?}"
            ))),
        }
    }

    fn at_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Some(Token::Name(n)) if n == kw)
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_and()?;
        while self.at_keyword("or") {
            self.pos += 1;
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_equality()?;
        while self.at_keyword("and") {
            self.pos += 1;
            let rhs = self.parse_equality()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_union()?;
        loop {
            let negate = match self.peek() {
                Some(Token::Eq) => false,
                Some(Token::NotEq) => true,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.parse_union()?;
            lhs = Expr::Equals {
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                negate,
            };
        }
    }

    fn parse_union(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_path()?;
        while self.peek() == Some(&Token::Pipe) {
            self.pos += 1;
            let rhs = self.parse_path()?;
            lhs = Expr::Union(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_path(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(Token::Slash) => {
                self.pos += 1;
                let steps = if self.starts_step() {
                    self.parse_relative()?
                } else {
                    Vec::new()
                };
                Ok(Expr::Path {
                    absolute: true,
                    steps,
                })
            }
            Some(Token::DoubleSlash) => {
                self.pos += 1;
                let mut steps = vec![descendant_or_self_step()];
                steps.extend(self.parse_relative()?);
                Ok(Expr::Path {
                    absolute: true,
                    steps,
                })
            }
            Some(Token::Literal(_)) | Some(Token::Number(_)) | Some(Token::LParen) => {
                self.parse_primary()
            }
            Some(Token::Name(name)) if self.is_function_call(name) => {
                let primary = self.parse_primary()?;
                self.parse_filter_tail(primary)
            }
            _ => Ok(Expr::Path {
                absolute: false,
                steps: self.parse_relative()?,
            }),
        }
    }

    fn is_function_call(&self, name: &str) -> bool {
        !matches!(name, "node" | "text" | "comment")
            && matches!(self.tokens.get(self.pos + 1), Some(Token::LParen))
    }

    fn parse_filter_tail(&mut self, primary: Expr) -> Result<Expr> {
        let mut steps = Vec::new();
        loop {
            match self.peek() {
                Some(Token::Slash) => {
                    self.pos += 1;
                    steps.push(self.parse_step()?);
                }
                Some(Token::DoubleSlash) => {
                    self.pos += 1;
                    steps.push(descendant_or_self_step());
                    steps.push(self.parse_step()?);
                }
                _ => break,
            }
        }
        if steps.is_empty() {
            Ok(primary)
        } else {
            Ok(Expr::Filter {
                primary: Box::new(primary),
                steps,
            })
        }
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::Literal(s)) => Ok(Expr::Literal(s)),
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::LParen) => {
                let e = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(e)
            }
            Some(Token::Name(name)) => {
                let function = match name.as_str() {
                    "not" => Function::Not,
                    "true" => Function::True,
                    "false" => Function::False,
                    "count" => Function::Count,
                    "position" => Function::Position,
                    "last" => Function::Last,
                    "id" => Function::Id,
                    "here" => Function::Here,
                    other => {
                        return Err(Error::Transform(format!(
                            "XPath: unsupported function '{other}()'"
                        )))
                    }
                };
                self.expect(Token::LParen)?;
                let mut args = Vec::new();
                if self.peek() != Some(&Token::RParen) {
                    args.push(self.parse_or()?);
                    while self.peek() == Some(&Token::Comma) {
                        self.pos += 1;
                        args.push(self.parse_or()?);
                    }
                }
                self.expect(Token::RParen)?;
                Ok(Expr::Call(function, args))
            }
            other => Err(Error::Transform(format!(
                "XPath: unexpected token {other:?}"
            ))),
        }
    }

    fn starts_step(&self) -> bool {
        matches!(
            self.peek(),
            Some(Token::Name(_)) | Some(Token::Star) | Some(Token::At) | Some(Token::Dot)
                | Some(Token::DotDot)
        )
    }

    fn parse_relative(&mut self) -> Result<Vec<Step>> {
        let mut steps = vec![self.parse_step()?];
        loop {
            match self.peek() {
                Some(Token::Slash) => {
                    self.pos += 1;
                    steps.push(self.parse_step()?);
                }
                Some(Token::DoubleSlash) => {
                    self.pos += 1;
                    steps.push(descendant_or_self_step());
                    steps.push(self.parse_step()?);
                }
                _ => return Ok(steps),
            }
        }
    }

    fn parse_step(&mut self) -> Result<Step> {
        match self.peek() {
            Some(Token::Dot) => {
                self.pos += 1;
                return Ok(Step {
                    axis: Axis::SelfAxis,
                    test: NodeTest::Node,
                    predicates: Vec::new(),
                });
            }
            Some(Token::DotDot) => {
                self.pos += 1;
                return Ok(Step {
                    axis: Axis::Parent,
                    test: NodeTest::Node,
                    predicates: Vec::new(),
                });
            }
            _ => {}
        }

        let axis = if self.peek() == Some(&Token::At) {
            self.pos += 1;
            Axis::Attribute
        } else if matches!(self.tokens.get(self.pos + 1), Some(Token::ColonColon)) {
            let Some(Token::Name(name)) = self.next() else {
                return Err(Error::Transform("XPath: expected axis name".into()));
            };
            self.pos += 1;
            Axis::from_name(&name)?
        } else {
            Axis::Child
        };

        let test = match self.next() {
            Some(Token::Star) => NodeTest::AnyName { prefix: None },
            Some(Token::Name(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    self.expect(Token::RParen)?;
                    match name.as_str() {
                        "node" => NodeTest::Node,
                        "text" => NodeTest::Text,
                        "comment" => NodeTest::Comment,
                        other => {
                            return Err(Error::Transform(format!(
                                "XPath: unsupported node test '{other}()'"
                            )))
                        }
                    }
                } else if let Some(prefix) = name.strip_suffix(":*") {
                    NodeTest::AnyName {
                        prefix: Some(prefix.to_owned()),
                    }
                } else if let Some((prefix, local)) = name.split_once(':') {
                    NodeTest::Name {
                        prefix: Some(prefix.to_owned()),
                        local: local.to_owned(),
                    }
                } else {
                    NodeTest::Name {
                        prefix: None,
                        local: name,
                    }
                }
            }
            other => {
                return Err(Error::Transform(format!(
                    "XPath: expected node test, found {other:?}"
                )))
            }
        };

        let mut predicates = Vec::new();
        while self.peek() == Some(&Token::LBracket) {
            self.pos += 1;
            predicates.push(self.parse_or()?);
            self.expect(Token::RBracket)?;
        }
        Ok(Step {
            axis,
            test,
            predicates,
        })
    }
}

fn descendant_or_self_step() -> Step {
    Step {
        axis: Axis::DescendantOrSelf,
        test: NodeTest::Node,
        predicates: Vec::new(),
    }
}

// ── Evaluation ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Value {
    Nodes(BTreeSet<usize>),
    /// Attribute values selected by an `attribute` step.
    Strings(Vec<String>),
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Value {
    fn to_bool(&self) -> bool {
        match self {
            Value::Nodes(n) => !n.is_empty(),
            Value::Strings(s) => !s.is_empty(),
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Text(s) => !s.is_empty(),
        }
    }
}

#[derive(Clone, Copy)]
struct Focus<'a, 'input> {
    node: roxmltree::Node<'a, 'input>,
    position: usize,
    size: usize,
}

struct Evaluator<'c, 'a, 'input> {
    ctx: &'c XPathContext<'a, 'input>,
}

impl<'c, 'a, 'input> Evaluator<'c, 'a, 'input> {
    fn node(&self, index: usize) -> Option<roxmltree::Node<'a, 'input>> {
        u32::try_from(index)
            .ok()
            .and_then(|i| self.ctx.doc.get_node(roxmltree::NodeId::new(i)))
    }

    fn eval(&mut self, expr: &Expr, focus: Focus<'a, 'input>) -> Result<Value> {
        match expr {
            Expr::Or(a, b) => Ok(Value::Bool(
                self.eval(a, focus)?.to_bool() || self.eval(b, focus)?.to_bool(),
            )),
            Expr::And(a, b) => Ok(Value::Bool(
                self.eval(a, focus)?.to_bool() && self.eval(b, focus)?.to_bool(),
            )),
            Expr::Equals { lhs, rhs, negate } => {
                let l = self.eval(lhs, focus)?;
                let r = self.eval(rhs, focus)?;
                Ok(Value::Bool(self.compare(&l, &r, *negate)))
            }
            Expr::Union(a, b) => match (self.eval(a, focus)?, self.eval(b, focus)?) {
                (Value::Nodes(mut x), Value::Nodes(y)) => {
                    x.extend(y);
                    Ok(Value::Nodes(x))
                }
                _ => Err(Error::Transform("XPath: '|' needs node-sets".into())),
            },
            Expr::Path { absolute, steps } => {
                let start = if *absolute {
                    self.ctx.doc.root()
                } else {
                    focus.node
                };
                self.eval_steps([start.id().get_usize()].into_iter().collect(), steps)
            }
            Expr::Filter { primary, steps } => match self.eval(primary, focus)? {
                Value::Nodes(start) => self.eval_steps(start, steps),
                _ => Err(Error::Transform("XPath: path applied to a non-node-set".into())),
            },
            Expr::Call(function, args) => self.call(*function, args, focus),
            Expr::Literal(s) => Ok(Value::Text(s.clone())),
            Expr::Number(n) => Ok(Value::Number(*n)),
        }
    }

    fn call(&mut self, function: Function, args: &[Expr], focus: Focus<'a, 'input>) -> Result<Value> {
        let arity = |n: usize| -> Result<()> {
            if args.len() == n {
                Ok(())
            } else {
                Err(Error::Transform(format!(
                    "XPath: {function:?}() takes {n} argument(s)"
                )))
            }
        };
        match function {
            Function::Not => {
                arity(1)?;
                Ok(Value::Bool(!self.eval(&args[0], focus)?.to_bool()))
            }
            Function::True => {
                arity(0)?;
                Ok(Value::Bool(true))
            }
            Function::False => {
                arity(0)?;
                Ok(Value::Bool(false))
            }
            Function::Position => {
                arity(0)?;
                Ok(Value::Number(focus.position as f64))
            }
            Function::Last => {
                arity(0)?;
                Ok(Value::Number(focus.size as f64))
            }
            Function::Count => {
                arity(1)?;
                match self.eval(&args[0], focus)? {
                    Value::Nodes(n) => Ok(Value::Number(n.len() as f64)),
                    Value::Strings(s) => Ok(Value::Number(s.len() as f64)),
                    _ => Err(Error::Transform("XPath: count() needs a node-set".into())),
                }
            }
            Function::Id => {
                arity(1)?;
                let ids = match self.eval(&args[0], focus)? {
                    Value::Text(s) => s,
                    Value::Strings(s) => s.join(" "),
                    Value::Nodes(nodes) => nodes
                        .iter()
                        .filter_map(|i| self.node(*i))
                        .map(crate::document::text_content)
                        .collect::<Vec<_>>()
                        .join(" "),
                    _ => return Err(Error::Transform("XPath: id() needs a string".into())),
                };
                Ok(Value::Nodes(
                    ids.split_whitespace()
                        .filter_map(|id| self.ctx.ids.get(id))
                        .map(|nid| nid.get_usize())
                        .collect(),
                ))
            }
            Function::Here => {
                arity(0)?;
                let here = self
                    .ctx
                    .here
                    .ok_or_else(|| Error::Transform("XPath: here() is not available".into()))?;
                Ok(Value::Nodes([here.get_usize()].into_iter().collect()))
            }
        }
    }

    fn compare(&self, l: &Value, r: &Value, negate: bool) -> bool {
        let strings = |v: &Value| -> Option<Vec<String>> {
            match v {
                Value::Nodes(n) => Some(
                    n.iter()
                        .filter_map(|i| self.node(*i))
                        .map(crate::document::text_content)
                        .collect(),
                ),
                Value::Strings(s) => Some(s.clone()),
                Value::Text(s) => Some(vec![s.clone()]),
                _ => None,
            }
        };
        match (l, r) {
            (Value::Bool(_), _) | (_, Value::Bool(_)) => (l.to_bool() == r.to_bool()) != negate,
            (Value::Number(a), Value::Number(b)) => (a == b) != negate,
            (Value::Number(n), other) | (other, Value::Number(n)) => {
                strings(other).is_some_and(|ss| {
                    ss.iter()
                        .any(|s| (s.trim().parse::<f64>().ok() == Some(*n)) != negate)
                })
            }
            _ => match (strings(l), strings(r)) {
                (Some(a), Some(b)) => a.iter().any(|x| b.iter().any(|y| (x == y) != negate)),
                _ => false,
            },
        }
    }

    fn eval_steps(&mut self, start: BTreeSet<usize>, steps: &[Step]) -> Result<Value> {
        let mut current = start;
        for (i, step) in steps.iter().enumerate() {
            if step.axis == Axis::Attribute {
                if i + 1 != steps.len() {
                    return Err(Error::Transform(
                        "XPath: attribute step must be the last step".into(),
                    ));
                }
                return Ok(Value::Strings(self.attribute_values(&current, step)?));
            }
            let mut next = BTreeSet::new();
            for index in &current {
                let Some(node) = self.node(*index) else {
                    continue;
                };
                for n in self.apply_step(node, step)? {
                    next.insert(n.id().get_usize());
                }
            }
            current = next;
        }
        Ok(Value::Nodes(current))
    }

    fn attribute_values(&self, from: &BTreeSet<usize>, step: &Step) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for node in from.iter().filter_map(|i| self.node(*i)) {
            for attr in node.attributes() {
                let keep = match &step.test {
                    NodeTest::Node | NodeTest::AnyName { prefix: None } => true,
                    NodeTest::AnyName { prefix: Some(p) } => {
                        attr.namespace() == Some(self.ctx.resolve_prefix(p)?)
                    }
                    NodeTest::Name { prefix, local } => {
                        let ns = match prefix {
                            Some(p) => Some(self.ctx.resolve_prefix(p)?),
                            None => None,
                        };
                        attr.name() == local && attr.namespace() == ns
                    }
                    NodeTest::Text | NodeTest::Comment => false,
                };
                if keep {
                    out.push(attr.value().to_owned());
                }
            }
        }
        Ok(out)
    }

    fn apply_step(
        &mut self,
        node: roxmltree::Node<'a, 'input>,
        step: &Step,
    ) -> Result<Vec<roxmltree::Node<'a, 'input>>> {
        let axis_nodes: Vec<roxmltree::Node<'a, 'input>> = match step.axis {
            Axis::Child => node.children().collect(),
            Axis::Descendant => node.descendants().skip(1).collect(),
            Axis::DescendantOrSelf => node.descendants().collect(),
            Axis::SelfAxis => vec![node],
            Axis::Parent => node.parent().into_iter().collect(),
            Axis::Ancestor => node.ancestors().skip(1).collect(),
            Axis::AncestorOrSelf => node.ancestors().collect(),
            Axis::FollowingSibling => node.next_siblings().skip(1).collect(),
            Axis::PrecedingSibling => node.prev_siblings().skip(1).collect(),
            Axis::Attribute => Vec::new(),
        };
        let mut matched = Vec::new();
        for n in axis_nodes {
            if self.test(n, &step.test)? {
                matched.push(n);
            }
        }
        for predicate in &step.predicates {
            let size = matched.len();
            let mut kept = Vec::with_capacity(size);
            for (i, n) in matched.into_iter().enumerate() {
                // Reverse axes were collected nearest-first, which is
                // already proximity order.
                let position = i + 1;
                let value = self.eval(
                    predicate,
                    Focus {
                        node: n,
                        position,
                        size,
                    },
                )?;
                let keep = match value {
                    Value::Number(want) => want == position as f64,
                    other => other.to_bool(),
                };
                if keep {
                    kept.push(n);
                }
            }
            matched = kept;
        }
        debug_assert!(
            step.axis.is_reverse()
                || matched
                    .windows(2)
                    .all(|w| w[0].id().get_usize() < w[1].id().get_usize())
        );
        Ok(matched)
    }

    fn test(&self, node: roxmltree::Node<'_, '_>, test: &NodeTest) -> Result<bool> {
        Ok(match test {
            NodeTest::Node => true,
            NodeTest::Text => node.is_text(),
            NodeTest::Comment => node.is_comment(),
            NodeTest::AnyName { prefix } => {
                node.is_element()
                    && match prefix {
                        None => true,
                        Some(p) => node.tag_name().namespace() == Some(self.ctx.resolve_prefix(p)?),
                    }
            }
            NodeTest::Name { prefix, local } => {
                if !node.is_element() || node.tag_name().name() != local {
                    return Ok(false);
                }
                match prefix {
                    None => node.tag_name().namespace().is_none(),
                    Some(p) => node.tag_name().namespace() == Some(self.ctx.resolve_prefix(p)?),
                }
            }
        })
    }
}
