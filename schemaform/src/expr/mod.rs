/// Visibility expressions: `show` rules compiled once into a typed syntax
/// tree plus an ordered dependency list, evaluated against dependency values.
mod eval;
mod parser;

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::path::{DataPath, FlatSnapshot};

pub use eval::truthy;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExprError {
    #[error("empty expression")]
    Empty,
    #[error("cannot parse expression '{source_text}': {message}")]
    Syntax {
        source_text: String,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    StrictEq,
    StrictNe,
    LooseEq,
    LooseNe,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `None` is `undefined`.
    Literal(Option<Value>),
    /// `$.a.b` as parsed.
    Path(DataPath),
    /// A path after binding: index into the dependency list.
    Dep(usize),
    Not(Box<Expr>),
    Compare {
        op: CompareOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

/// A compiled `show` rule.
#[derive(Debug, Clone, PartialEq)]
pub struct ShowExpr {
    source: String,
    expr: Expr,
    dependencies: Vec<DataPath>,
}

impl ShowExpr {
    pub fn compile(src: &str) -> Result<Self, ExprError> {
        let parsed = parser::parse(src)?;
        let mut dependencies = Vec::new();
        let expr = bind(parsed, &mut dependencies);
        Ok(Self {
            source: src.to_string(),
            expr,
            dependencies,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Referenced paths, de-duplicated, in first-appearance order.
    pub fn dependencies(&self) -> &[DataPath] {
        &self.dependencies
    }

    /// Dependency values looked up in a flattened snapshot, in dependency order.
    pub fn collect(&self, snapshot: &FlatSnapshot) -> Vec<Option<Value>> {
        self.dependencies
            .iter()
            .map(|path| snapshot.get(path).cloned())
            .collect()
    }

    /// Evaluate against values given in dependency order.
    pub fn eval(&self, deps: &[Option<Value>]) -> bool {
        truthy(eval::eval(&self.expr, deps).as_ref())
    }
}

fn bind(expr: Expr, deps: &mut Vec<DataPath>) -> Expr {
    match expr {
        Expr::Path(path) => {
            let index = match deps.iter().position(|p| *p == path) {
                Some(i) => i,
                None => {
                    deps.push(path);
                    deps.len() - 1
                }
            };
            Expr::Dep(index)
        }
        Expr::Not(inner) => Expr::Not(Box::new(bind(*inner, deps))),
        Expr::Compare { op, lhs, rhs } => Expr::Compare {
            op,
            lhs: Box::new(bind(*lhs, deps)),
            rhs: Box::new(bind(*rhs, deps)),
        },
        Expr::And(lhs, rhs) => Expr::And(Box::new(bind(*lhs, deps)), Box::new(bind(*rhs, deps))),
        Expr::Or(lhs, rhs) => Expr::Or(Box::new(bind(*lhs, deps)), Box::new(bind(*rhs, deps))),
        other => other,
    }
}

/// Compiled expressions keyed by source text, so each distinct rule is parsed
/// once per form no matter how many nodes or re-renders use it.
#[derive(Debug, Default)]
pub struct ExprCache {
    entries: HashMap<String, Result<Arc<ShowExpr>, ExprError>>,
}

impl ExprCache {
    pub fn get_or_compile(&mut self, src: &str) -> Result<Arc<ShowExpr>, ExprError> {
        self.entries
            .entry(src.to_string())
            .or_insert_with(|| ShowExpr::compile(src).map(Arc::new))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
