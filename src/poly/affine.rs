//! Affine forms over named integer variables.
//!
//! Index expressions produced by lowering are affine in the loop iterators.
//! Converting them to `Σ cᵢ·xᵢ + c` makes windows, offsets and
//! canonical re-emission straightforward.

use crate::ir::expr::{make_binary, BinaryOp, Expr, ExprNode, UnaryOp, Var};
use crate::ir::types::Type;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};

/// `Σ terms[x]·x + constant`, with zero coefficients removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AffineForm {
    pub terms: BTreeMap<String, i64>,
    pub constant: i64,
}

impl AffineForm {
    pub fn constant(c: i64) -> Self {
        Self { terms: BTreeMap::new(), constant: c }
    }

    pub fn var(name: impl Into<String>) -> Self {
        let mut terms = BTreeMap::new();
        terms.insert(name.into(), 1);
        Self { terms, constant: 0 }
    }

    pub fn is_constant(&self) -> bool {
        self.terms.is_empty()
    }

    /// Coefficient of `name` (0 if absent).
    pub fn coeff(&self, name: &str) -> i64 {
        self.terms.get(name).copied().unwrap_or(0)
    }

    pub fn vars(&self) -> impl Iterator<Item = &str> {
        self.terms.keys().map(|s| s.as_str())
    }

    fn normalized(mut self) -> Self {
        self.terms.retain(|_, c| *c != 0);
        self
    }

    /// Extract an affine form from an `int32` expression.
    ///
    /// Returns `None` for anything non-affine (products of variables,
    /// division, loads, other types).
    pub fn from_expr(expr: &Expr) -> Option<AffineForm> {
        if expr.ty() != Type::index() {
            return None;
        }
        match expr.node() {
            ExprNode::IntImm { value, .. } => Some(AffineForm::constant(*value)),
            ExprNode::Var(v) => Some(AffineForm::var(v.name.clone())),
            ExprNode::Unary { op: UnaryOp::Minus, v, .. } => Some(-AffineForm::from_expr(v)?),
            ExprNode::Binary { op, a, b, .. } => {
                let (fa, fb) = (AffineForm::from_expr(a)?, AffineForm::from_expr(b)?);
                match op {
                    BinaryOp::Add => Some(fa + fb),
                    BinaryOp::Sub => Some(fa - fb),
                    BinaryOp::Mul if fa.is_constant() => Some(fb * fa.constant),
                    BinaryOp::Mul if fb.is_constant() => Some(fa * fb.constant),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Canonical expression: positive terms by name, then negative terms,
    /// then the constant.
    pub fn to_expr(&self) -> Expr {
        let ty = Type::index();
        let term = |name: &str, c: i64| -> Expr {
            let v = Expr::var(&Var::index(name));
            if c.abs() == 1 {
                v
            } else {
                make_binary(BinaryOp::Mul, ty, v, Expr::int(c.abs()))
            }
        };

        let mut acc: Option<Expr> = None;
        for (name, &c) in self.terms.iter().filter(|(_, c)| **c > 0) {
            let t = term(name, c);
            acc = Some(match acc {
                Some(a) => make_binary(BinaryOp::Add, ty, a, t),
                None => t,
            });
        }
        let mut constant_done = false;
        if acc.is_none() && self.constant > 0 {
            acc = Some(Expr::int(self.constant));
            constant_done = true;
        }
        for (name, &c) in self.terms.iter().filter(|(_, c)| **c < 0) {
            let t = term(name, c);
            let base = acc.unwrap_or_else(|| Expr::int(0));
            acc = Some(make_binary(BinaryOp::Sub, ty, base, t));
        }
        match acc {
            None => Expr::int(self.constant),
            Some(a) if constant_done || self.constant == 0 => a,
            Some(a) if self.constant > 0 => make_binary(BinaryOp::Add, ty, a, Expr::int(self.constant)),
            Some(a) => make_binary(BinaryOp::Sub, ty, a, Expr::int(-self.constant)),
        }
    }
}

impl Add for AffineForm {
    type Output = AffineForm;

    fn add(mut self, rhs: AffineForm) -> AffineForm {
        for (name, c) in rhs.terms {
            *self.terms.entry(name).or_insert(0) += c;
        }
        self.constant += rhs.constant;
        self.normalized()
    }
}

impl Neg for AffineForm {
    type Output = AffineForm;

    fn neg(self) -> AffineForm {
        self * -1
    }
}

impl Sub for AffineForm {
    type Output = AffineForm;

    fn sub(self, rhs: AffineForm) -> AffineForm {
        self + (-rhs)
    }
}

impl Mul<i64> for AffineForm {
    type Output = AffineForm;

    fn mul(mut self, k: i64) -> AffineForm {
        for c in self.terms.values_mut() {
            *c *= k;
        }
        self.constant *= k;
        self.normalized()
    }
}

impl fmt::Display for AffineForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_expr())
    }
}
