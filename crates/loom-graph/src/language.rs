//! The traversal language: a closed, read-only step pipeline.
//!
//! ```text
//! query := "g" ( "." step )*
//! step  := ident "(" [ arg ( "," arg )* ] ")"
//! arg   := 'string' | "string" | integer
//! ```
//!
//! Only the steps of [`Step`] exist. Anything else, and in particular every
//! step that would mutate the graph, is rejected when the query is compiled.

use std::{fmt, iter::Peekable, str::CharIndices};

// ─── AST ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
  Str(String),
  Int(i64),
}

impl fmt::Display for Literal {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Str(s) => write!(f, "{s:?}"),
      Self::Int(n) => write!(f, "{n}"),
    }
  }
}

/// Direction of an adjacency step, relative to the current vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
  Out,
  In,
  Both,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
  /// `out`, `in`, `both`: adjacent vertices over edges with one of `labels`
  /// (any label when empty).
  Vertices { direction: Direction, labels: Vec<String> },
  /// `outE`, `inE`, `bothE`.
  Edges { direction: Direction, labels: Vec<String> },
  OutV,
  InV,
  BothV,
  OtherV,
  HasLabel(Vec<String>),
  Has { key: String, value: Option<Literal> },
  HasNot(String),
  Values(Vec<String>),
  Id,
  Label,
  Dedup,
  Limit(usize),
  Count,
}

/// A compiled query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
  pub steps: Vec<Step>,
}

const MUTATIONS: &[&str] = &[
  "addV", "addE", "drop", "property", "sideEffect", "inject", "mergeV",
  "mergeE", "io", "call",
];

// ─── Parser ──────────────────────────────────────────────────────────────────

/// Compile `query` into a [`Pipeline`]. The error is a human-readable reason.
pub fn compile(query: &str) -> Result<Pipeline, String> {
  let mut parser = Parser { src: query, chars: query.char_indices().peekable() };
  parser.skip_ws();
  parser.expect_ident("g")?;

  let mut steps = Vec::new();
  loop {
    parser.skip_ws();
    match parser.peek() {
      None => break,
      Some('.') => {
        parser.bump();
        parser.skip_ws();
        let name = parser.ident()?;
        let args = parser.args()?;
        steps.push(step(&name, args)?);
      }
      Some(c) => return Err(format!("unexpected {c:?} at offset {}", parser.offset())),
    }
  }
  Ok(Pipeline { steps })
}

fn step(name: &str, args: Vec<Literal>) -> Result<Step, String> {
  let labels = |args: Vec<Literal>| strings(name, args);
  Ok(match name {
    "out" => Step::Vertices { direction: Direction::Out, labels: labels(args)? },
    "in" => Step::Vertices { direction: Direction::In, labels: labels(args)? },
    "both" => Step::Vertices { direction: Direction::Both, labels: labels(args)? },
    "outE" => Step::Edges { direction: Direction::Out, labels: labels(args)? },
    "inE" => Step::Edges { direction: Direction::In, labels: labels(args)? },
    "bothE" => Step::Edges { direction: Direction::Both, labels: labels(args)? },
    "outV" => nullary(name, args, Step::OutV)?,
    "inV" => nullary(name, args, Step::InV)?,
    "bothV" => nullary(name, args, Step::BothV)?,
    "otherV" => nullary(name, args, Step::OtherV)?,
    "hasLabel" => {
      let labels = labels(args)?;
      if labels.is_empty() {
        return Err("hasLabel() needs at least one label".into());
      }
      Step::HasLabel(labels)
    }
    "has" => {
      let mut args = args.into_iter();
      let key = match args.next() {
        Some(Literal::Str(key)) => key,
        _ => return Err("has() needs a property key".into()),
      };
      let value = args.next();
      if args.next().is_some() {
        return Err("has() takes a key and an optional value".into());
      }
      Step::Has { key, value }
    }
    "hasNot" => match args.as_slice() {
      [Literal::Str(key)] => Step::HasNot(key.clone()),
      _ => return Err("hasNot() needs exactly one property key".into()),
    },
    "values" => Step::Values(labels(args)?),
    "id" => nullary(name, args, Step::Id)?,
    "label" => nullary(name, args, Step::Label)?,
    "dedup" => nullary(name, args, Step::Dedup)?,
    "count" => nullary(name, args, Step::Count)?,
    "limit" => match args.as_slice() {
      [Literal::Int(n)] if *n >= 0 => Step::Limit(*n as usize),
      _ => return Err("limit() needs one non-negative integer".into()),
    },
    mutation if MUTATIONS.contains(&mutation) => {
      return Err(format!("step {mutation}() is not permitted, traversals are read-only"));
    }
    other => return Err(format!("unknown step {other}()")),
  })
}

fn nullary(name: &str, args: Vec<Literal>, step: Step) -> Result<Step, String> {
  if args.is_empty() { Ok(step) } else { Err(format!("{name}() takes no arguments")) }
}

fn strings(name: &str, args: Vec<Literal>) -> Result<Vec<String>, String> {
  args
    .into_iter()
    .map(|arg| match arg {
      Literal::Str(s) => Ok(s),
      Literal::Int(n) => Err(format!("{name}() expects strings, got {n}")),
    })
    .collect()
}

struct Parser<'a> {
  src:   &'a str,
  chars: Peekable<CharIndices<'a>>,
}

impl Parser<'_> {
  fn peek(&mut self) -> Option<char> { self.chars.peek().map(|&(_, c)| c) }

  fn bump(&mut self) -> Option<char> { self.chars.next().map(|(_, c)| c) }

  fn offset(&mut self) -> usize {
    self.chars.peek().map_or(self.src.len(), |&(i, _)| i)
  }

  fn skip_ws(&mut self) {
    while self.peek().is_some_and(char::is_whitespace) {
      self.bump();
    }
  }

  fn ident(&mut self) -> Result<String, String> {
    let mut ident = String::new();
    while let Some(c) = self.peek().filter(|c| c.is_ascii_alphanumeric() || *c == '_') {
      ident.push(c);
      self.bump();
    }
    if ident.is_empty() {
      return Err(format!("expected a step name at offset {}", self.offset()));
    }
    Ok(ident)
  }

  fn expect_ident(&mut self, expected: &str) -> Result<(), String> {
    match self.ident() {
      Ok(ident) if ident == expected => Ok(()),
      _ => Err(format!("a traversal must start with {expected:?}")),
    }
  }

  fn expect(&mut self, expected: char) -> Result<(), String> {
    self.skip_ws();
    match self.bump() {
      Some(c) if c == expected => Ok(()),
      Some(c) => Err(format!("expected {expected:?}, found {c:?}")),
      None => Err(format!("expected {expected:?}, found end of query")),
    }
  }

  fn args(&mut self) -> Result<Vec<Literal>, String> {
    self.expect('(')?;
    let mut args = Vec::new();
    self.skip_ws();
    if self.peek() == Some(')') {
      self.bump();
      return Ok(args);
    }
    loop {
      self.skip_ws();
      args.push(self.literal()?);
      self.skip_ws();
      match self.bump() {
        Some(',') => continue,
        Some(')') => return Ok(args),
        Some(c) => return Err(format!("expected ',' or ')', found {c:?}")),
        None => return Err("unterminated argument list".into()),
      }
    }
  }

  fn literal(&mut self) -> Result<Literal, String> {
    match self.peek() {
      Some(quote @ ('\'' | '"')) => {
        self.bump();
        let mut s = String::new();
        loop {
          match self.bump() {
            Some('\\') => match self.bump() {
              Some(c) => s.push(c),
              None => return Err("unterminated string".into()),
            },
            Some(c) if c == quote => return Ok(Literal::Str(s)),
            Some(c) => s.push(c),
            None => return Err("unterminated string".into()),
          }
        }
      }
      Some(c) if c == '-' || c.is_ascii_digit() => {
        let mut digits = String::new();
        while let Some(c) = self.peek().filter(|c| *c == '-' || c.is_ascii_digit()) {
          digits.push(c);
          self.bump();
        }
        digits
          .parse()
          .map(Literal::Int)
          .map_err(|_| format!("invalid integer {digits:?}"))
      }
      Some(c) => Err(format!("unexpected {c:?} in argument list")),
      None => Err("unterminated argument list".into()),
    }
  }
}
