//! Predicate evaluation for selections.
//!
//! A selection is a list of column comparisons joined by combinators. The
//! combinators do not apply left to right: every AND is collapsed first,
//! then every OR, then every XOR.
//!
//! ```text
//! T XOR F AND T   ->   T XOR (F AND T)   ->   T XOR F   ->   T
//! ```

use crate::catalog::TableSchema;
use crate::table::{ClusteredTable, Scan};
use crate::tuple::Tuple;
use ordo_common::{OrdoError, Result, Value};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Comparison operator of a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

impl CompareOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Lt => "<",
            CompareOp::Ge => ">=",
            CompareOp::Le => "<=",
        }
    }

    /// Applies the operator to a column value and a literal.
    pub fn evaluate(&self, lhs: &Value, rhs: &Value) -> bool {
        let ord = lhs.cmp(rhs);
        match self {
            CompareOp::Eq => ord == Ordering::Equal,
            CompareOp::Ne => ord != Ordering::Equal,
            CompareOp::Gt => ord == Ordering::Greater,
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::Ge => ord != Ordering::Less,
            CompareOp::Le => ord != Ordering::Greater,
        }
    }
}

impl FromStr for CompareOp {
    type Err = OrdoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "=" => Ok(CompareOp::Eq),
            "!=" => Ok(CompareOp::Ne),
            ">" => Ok(CompareOp::Gt),
            "<" => Ok(CompareOp::Lt),
            ">=" => Ok(CompareOp::Ge),
            "<=" => Ok(CompareOp::Le),
            other => Err(OrdoError::InvalidOperator(other.to_string())),
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Boolean operator joining two adjacent predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    And,
    Or,
    Xor,
}

impl Combinator {
    /// Collapse order: all ANDs, then all ORs, then all XORs.
    const PRECEDENCE: [Combinator; 3] = [Combinator::And, Combinator::Or, Combinator::Xor];

    pub fn apply(&self, lhs: bool, rhs: bool) -> bool {
        match self {
            Combinator::And => lhs && rhs,
            Combinator::Or => lhs || rhs,
            Combinator::Xor => lhs ^ rhs,
        }
    }
}

impl FromStr for Combinator {
    type Err = OrdoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AND" => Ok(Combinator::And),
            "OR" => Ok(Combinator::Or),
            "XOR" => Ok(Combinator::Xor),
            _ => Err(OrdoError::InvalidOperator(s.to_string())),
        }
    }
}

impl fmt::Display for Combinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Combinator::And => f.write_str("AND"),
            Combinator::Or => f.write_str("OR"),
            Combinator::Xor => f.write_str("XOR"),
        }
    }
}

/// Reduces predicate outcomes with their combinators.
///
/// `combinators[i]` joins `values[i]` and `values[i + 1]`. An empty list of
/// values is false.
pub fn combine(values: &[bool], combinators: &[Combinator]) -> Result<bool> {
    if values.is_empty() {
        return Ok(false);
    }
    if combinators.len() + 1 != values.len() {
        return Err(OrdoError::InvalidOperator(format!(
            "{} combinators for {} predicates",
            combinators.len(),
            values.len()
        )));
    }

    Ok(collapse(values, combinators))
}

/// Applies combinators one precedence level at a time. Expects exactly one
/// combinator between each pair of values.
fn collapse(values: &[bool], combinators: &[Combinator]) -> bool {
    let mut values = values.to_vec();
    let mut ops = combinators.to_vec();
    for level in Combinator::PRECEDENCE {
        let mut i = 0;
        while i < ops.len() {
            if ops[i] == level {
                let rhs = values.remove(i + 1);
                values[i] = level.apply(values[i], rhs);
                ops.remove(i);
            } else {
                i += 1;
            }
        }
    }
    values.first().copied().unwrap_or(false)
}

/// A comparison of one column against a literal.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub table: String,
    pub column: String,
    pub op: CompareOp,
    pub value: Value,
}

impl Predicate {
    pub fn new(
        table: impl Into<String>,
        column: impl Into<String>,
        op: CompareOp,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            op,
            value: value.into(),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} {} {}", self.table, self.column, self.op, self.value)
    }
}

#[derive(Debug, Clone)]
struct BoundPredicate {
    position: usize,
    op: CompareOp,
    value: Value,
}

/// Predicates and combinators resolved against one table's schema.
#[derive(Debug, Clone)]
pub struct PredicateEvaluator {
    predicates: Vec<BoundPredicate>,
    combinators: Vec<Combinator>,
}

impl PredicateEvaluator {
    /// Resolves every predicate column and checks literal types.
    ///
    /// Fails with `TableMismatch` if a predicate names another table and
    /// with `InvalidOperator` unless there is exactly one combinator
    /// between each pair of predicates.
    pub fn bind(
        schema: &TableSchema,
        predicates: &[Predicate],
        combinators: &[Combinator],
    ) -> Result<Self> {
        if !predicates.is_empty() && combinators.len() + 1 != predicates.len() {
            return Err(OrdoError::InvalidOperator(format!(
                "{} combinators for {} predicates",
                combinators.len(),
                predicates.len()
            )));
        }
        let mut bound = Vec::with_capacity(predicates.len());
        for predicate in predicates {
            if predicate.table != schema.name() {
                return Err(OrdoError::TableMismatch {
                    expected: schema.name().to_string(),
                    found: predicate.table.clone(),
                });
            }
            let position = schema.check_value(&predicate.column, &predicate.value)?;
            bound.push(BoundPredicate {
                position,
                op: predicate.op,
                value: predicate.value.clone(),
            });
        }
        Ok(Self {
            predicates: bound,
            combinators: combinators.to_vec(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Returns true if `tuple` satisfies the combined predicates.
    pub fn matches(&self, tuple: &Tuple) -> bool {
        let outcomes: Vec<bool> = self
            .predicates
            .iter()
            .map(|p| {
                tuple
                    .get(p.position)
                    .is_some_and(|v| p.op.evaluate(v, &p.value))
            })
            .collect();
        // lengths were checked by bind
        collapse(&outcomes, &self.combinators)
    }
}

/// Forward-only stream of the tuples of a table matching a predicate list.
pub struct Selection {
    scan: Option<Scan>,
    evaluator: PredicateEvaluator,
}

impl Selection {
    /// Starts a full scan of `table` filtered by the predicates.
    pub fn new(
        table: &ClusteredTable,
        predicates: &[Predicate],
        combinators: &[Combinator],
    ) -> Result<Self> {
        let evaluator = PredicateEvaluator::bind(table.schema(), predicates, combinators)?;
        Ok(Self {
            scan: (!evaluator.is_empty()).then(|| table.scan()),
            evaluator,
        })
    }

    /// A selection that yields nothing.
    pub fn empty() -> Self {
        Self {
            scan: None,
            evaluator: PredicateEvaluator {
                predicates: Vec::new(),
                combinators: Vec::new(),
            },
        }
    }
}

impl Iterator for Selection {
    type Item = Result<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        let scan = self.scan.as_mut()?;
        loop {
            match scan.next()? {
                Ok(tuple) if self.evaluator.matches(&tuple) => return Some(Ok(tuple)),
                Ok(_) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
