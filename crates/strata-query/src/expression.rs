//! Arithmetic expressions over numeric columns.
//!
//! Operands compose with the ordinary operators and are compared with the
//! comparison methods of [`Subexpr`]:
//!
//! ```text
//!   (Subexpr::column(0) + Subexpr::column(1) * 2).greater(100)
//! ```
//!
//! Evaluation runs eight rows at a time. Mixing operand types promotes
//! `Int -> Float -> Double`. Integer arithmetic wraps, and integer division
//! by zero yields 0.

use std::ops::{Add, Div, Mul, Sub};

use strata_common::{Result, StrataError, NOT_FOUND};
use strata_storage::{
    Array, ArrayBasic, Column, Condition, Equal, Greater, GreaterEqual, LeafCursor, Less, LessEqual, NotEqual,
    Table,
};

/// Rows evaluated per batch.
pub const BATCH: usize = 8;

/// A constant operand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Int(i64),
    Float(f32),
    Double(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// An operand: a column, a constant, or an operator over two operands.
#[derive(Debug, Clone, PartialEq)]
pub enum Subexpr {
    Column(usize),
    Value(Scalar),
    Operator(ArithOp, Box<Subexpr>, Box<Subexpr>),
}

impl Subexpr {
    pub fn column(column: usize) -> Self {
        Subexpr::Column(column)
    }

    fn operator(op: ArithOp, left: Subexpr, right: Subexpr) -> Self {
        Subexpr::Operator(op, Box::new(left), Box::new(right))
    }

    fn compare(self, op: CompareOp, right: impl Into<Subexpr>) -> Compare {
        Compare {
            op,
            left: self,
            right: right.into(),
        }
    }

    pub fn equal(self, right: impl Into<Subexpr>) -> Compare {
        self.compare(CompareOp::Equal, right)
    }

    pub fn not_equal(self, right: impl Into<Subexpr>) -> Compare {
        self.compare(CompareOp::NotEqual, right)
    }

    pub fn greater(self, right: impl Into<Subexpr>) -> Compare {
        self.compare(CompareOp::Greater, right)
    }

    pub fn greater_equal(self, right: impl Into<Subexpr>) -> Compare {
        self.compare(CompareOp::GreaterEqual, right)
    }

    pub fn less(self, right: impl Into<Subexpr>) -> Compare {
        self.compare(CompareOp::Less, right)
    }

    pub fn less_equal(self, right: impl Into<Subexpr>) -> Compare {
        self.compare(CompareOp::LessEqual, right)
    }

    /// Resolves columns against `table`.
    fn bind(&self, table: &Table) -> Result<Bound> {
        Ok(match self {
            Subexpr::Column(c) => match table.column(*c)? {
                Column::Int(_) => Bound::Int(*c, LeafCursor::new()),
                Column::Float(_) => Bound::Float(*c, LeafCursor::new()),
                Column::Double(_) => Bound::Double(*c, LeafCursor::new()),
                _ => {
                    return Err(StrataError::ColumnTypeMismatch {
                        column: *c,
                        expected: "numeric".to_string(),
                        actual: table.get_real_column_type(*c)?.name().to_string(),
                    })
                }
            },
            Subexpr::Value(v) => Bound::Value(*v),
            Subexpr::Operator(op, l, r) => Bound::Operator(*op, Box::new(l.bind(table)?), Box::new(r.bind(table)?)),
        })
    }
}

impl From<i32> for Subexpr {
    fn from(v: i32) -> Self {
        Subexpr::Value(Scalar::Int(v.into()))
    }
}

impl From<i64> for Subexpr {
    fn from(v: i64) -> Self {
        Subexpr::Value(Scalar::Int(v))
    }
}

impl From<f32> for Subexpr {
    fn from(v: f32) -> Self {
        Subexpr::Value(Scalar::Float(v))
    }
}

impl From<f64> for Subexpr {
    fn from(v: f64) -> Self {
        Subexpr::Value(Scalar::Double(v))
    }
}

impl From<Scalar> for Subexpr {
    fn from(v: Scalar) -> Self {
        Subexpr::Value(v)
    }
}

macro_rules! arith_impl {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<R: Into<Subexpr>> $trait<R> for Subexpr {
            type Output = Subexpr;

            fn $method(self, rhs: R) -> Subexpr {
                Subexpr::operator($op, self, rhs.into())
            }
        }
    };
}

arith_impl!(Add, add, ArithOp::Add);
arith_impl!(Sub, sub, ArithOp::Sub);
arith_impl!(Mul, mul, ArithOp::Mul);
arith_impl!(Div, div, ArithOp::Div);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    NotEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
}

impl CompareOp {
    fn holds<T: PartialOrd>(self, a: T, b: T) -> bool {
        match self {
            CompareOp::Equal => Equal::eval(a, b),
            CompareOp::NotEqual => NotEqual::eval(a, b),
            CompareOp::Greater => Greater::eval(a, b),
            CompareOp::GreaterEqual => GreaterEqual::eval(a, b),
            CompareOp::Less => Less::eval(a, b),
            CompareOp::LessEqual => LessEqual::eval(a, b),
        }
    }
}

/// A comparison of two operands, used as a query condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Compare {
    pub op: CompareOp,
    pub left: Subexpr,
    pub right: Subexpr,
}

impl Compare {
    /// Resolves both operands against `table`.
    pub fn bind(&self, table: &Table) -> Result<BoundCompare> {
        Ok(BoundCompare {
            op: self.op,
            left: self.left.bind(table)?,
            right: self.right.bind(table)?,
        })
    }
}

// ============================================================================
// Evaluation
// ============================================================================

/// Values of up to [`BATCH`] consecutive rows.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Batch {
    Int([i64; BATCH]),
    Float([f32; BATCH]),
    Double([f64; BATCH]),
}

impl Batch {
    fn rank(&self) -> u8 {
        match self {
            Batch::Int(_) => 0,
            Batch::Float(_) => 1,
            Batch::Double(_) => 2,
        }
    }

    fn splat(value: Scalar) -> Self {
        match value {
            Scalar::Int(v) => Batch::Int([v; BATCH]),
            Scalar::Float(v) => Batch::Float([v; BATCH]),
            Scalar::Double(v) => Batch::Double([v; BATCH]),
        }
    }

    fn promote(self, rank: u8) -> Self {
        match (self, rank) {
            (Batch::Int(v), 1) => Batch::Float(v.map(|x| x as f32)),
            (Batch::Int(v), 2) => Batch::Double(v.map(|x| x as f64)),
            (Batch::Float(v), 2) => Batch::Double(v.map(f64::from)),
            (b, _) => b,
        }
    }

    /// Promotes both sides to the wider type.
    fn unify(a: Batch, b: Batch) -> (Batch, Batch) {
        let rank = a.rank().max(b.rank());
        (a.promote(rank), b.promote(rank))
    }

    fn apply(op: ArithOp, a: Batch, b: Batch) -> Batch {
        match Batch::unify(a, b) {
            (Batch::Int(x), Batch::Int(y)) => Batch::Int(std::array::from_fn(|i| int_op(op, x[i], y[i]))),
            (Batch::Float(x), Batch::Float(y)) => Batch::Float(std::array::from_fn(|i| float_op(op, x[i], y[i]))),
            (Batch::Double(x), Batch::Double(y)) => {
                Batch::Double(std::array::from_fn(|i| float_op(op, x[i], y[i])))
            }
            (a, _) => a,
        }
    }
}

fn int_op(op: ArithOp, a: i64, b: i64) -> i64 {
    match op {
        ArithOp::Add => a.wrapping_add(b),
        ArithOp::Sub => a.wrapping_sub(b),
        ArithOp::Mul => a.wrapping_mul(b),
        ArithOp::Div if b == 0 => 0,
        ArithOp::Div => a.wrapping_div(b),
    }
}

fn float_op<T>(op: ArithOp, a: T, b: T) -> T
where
    T: Add<Output = T> + Sub<Output = T> + Mul<Output = T> + Div<Output = T>,
{
    match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a * b,
        ArithOp::Div => a / b,
    }
}

/// An operand resolved against a table.
#[derive(Clone)]
enum Bound {
    Int(usize, LeafCursor<Array>),
    Float(usize, LeafCursor<ArrayBasic<f32>>),
    Double(usize, LeafCursor<ArrayBasic<f64>>),
    Value(Scalar),
    Operator(ArithOp, Box<Bound>, Box<Bound>),
}

impl Bound {
    /// Values of rows `start..start + count`; `count <= BATCH`.
    fn eval(&mut self, table: &Table, start: usize, count: usize) -> Result<Batch> {
        Ok(match self {
            Bound::Int(col, cursor) => {
                let tree = table.int_column(*col)?.tree();
                let mut out = [0i64; BATCH];
                for (i, slot) in out[..count].iter_mut().enumerate() {
                    *slot = cursor.get(tree, start + i);
                }
                Batch::Int(out)
            }
            Bound::Float(col, cursor) => {
                let tree = table.float_column(*col)?.tree();
                let mut out = [0f32; BATCH];
                for (i, slot) in out[..count].iter_mut().enumerate() {
                    *slot = cursor.get(tree, start + i);
                }
                Batch::Float(out)
            }
            Bound::Double(col, cursor) => {
                let tree = table.double_column(*col)?.tree();
                let mut out = [0f64; BATCH];
                for (i, slot) in out[..count].iter_mut().enumerate() {
                    *slot = cursor.get(tree, start + i);
                }
                Batch::Double(out)
            }
            Bound::Value(v) => Batch::splat(*v),
            Bound::Operator(op, l, r) => {
                let a = l.eval(table, start, count)?;
                let b = r.eval(table, start, count)?;
                Batch::apply(*op, a, b)
            }
        })
    }
}

/// A [`Compare`] resolved against a table.
#[derive(Clone)]
pub struct BoundCompare {
    op: CompareOp,
    left: Bound,
    right: Bound,
}

impl BoundCompare {
    /// First row in `[start, end)` where the comparison holds, or
    /// `NOT_FOUND`.
    pub fn find_first(&mut self, table: &Table, start: usize, end: usize) -> Result<usize> {
        let mut s = start;
        while s < end {
            let count = (end - s).min(BATCH);
            let a = self.left.eval(table, s, count)?;
            let b = self.right.eval(table, s, count)?;
            let hit = match Batch::unify(a, b) {
                (Batch::Int(x), Batch::Int(y)) => (0..count).find(|&i| self.op.holds(x[i], y[i])),
                (Batch::Float(x), Batch::Float(y)) => (0..count).find(|&i| self.op.holds(x[i], y[i])),
                (Batch::Double(x), Batch::Double(y)) => (0..count).find(|&i| self.op.holds(x[i], y[i])),
                _ => None,
            };
            if let Some(i) = hit {
                return Ok(s + i);
            }
            s += count;
        }
        Ok(NOT_FOUND)
    }
}
