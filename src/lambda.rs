//! Predicates that are compiled into kernels.
//!
//! An [`Expr`] is built from the placeholder [`_1`], which stands for the current element, and
//! constants:
//!
//! ```
//! use rust_gpu_compute::lambda::{_1, all, get};
//! use rust_gpu_compute::types::Int4;
//!
//! let positive = _1.gt(0.0f32);
//! let first_lane_small = get(0, _1).lt(4);
//! let whole_vector = all(_1.equal(Int4::new(1, 2, 3, 4)));
//! let odd = (_1 % 2).equal(1);
//! ```
//!
//! If an expression isn't enough, a [`Function`] with arbitrary OpenCL C source can be used.

use std::ops::{Add, BitAnd, BitOr, BitXor, Div, Mul, Neg, Not, Rem, Sub};

use crate::meta_kernel::MetaKernel;
use crate::types::ClType;

/// The placeholder for the element a predicate is applied to.
#[allow(non_upper_case_globals)]
pub const _1: Expr = Expr(Node::Arg);

#[derive(Clone, Debug)]
enum Node {
    Arg,
    Literal { source: String, fp64: bool },
    Lane(Box<Node>, usize),
    Unary(&'static str, Box<Node>),
    Binary(&'static str, Box<Node>, Box<Node>),
    Call(String, Vec<Node>),
}

impl Node {
    fn render(&self, out: &mut String, arg: &str) {
        match self {
            Node::Arg => out.push_str(arg),
            Node::Literal { source, .. } => out.push_str(source),
            Node::Lane(vector, lane) => {
                match vector.as_ref() {
                    Node::Arg => out.push_str(arg),
                    vector => {
                        out.push('(');
                        vector.render(out, arg);
                        out.push(')');
                    }
                }
                out.push_str(&format!(".s{:x}", lane));
            }
            Node::Unary(op, operand) => {
                out.push('(');
                out.push_str(op);
                operand.render(out, arg);
                out.push(')');
            }
            Node::Binary(op, lhs, rhs) => {
                out.push('(');
                lhs.render(out, arg);
                out.push(' ');
                out.push_str(op);
                out.push(' ');
                rhs.render(out, arg);
                out.push(')');
            }
            Node::Call(name, args) => {
                out.push_str(name);
                out.push('(');
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    a.render(out, arg);
                }
                out.push(')');
            }
        }
    }

    fn needs_fp64(&self) -> bool {
        match self {
            Node::Arg => false,
            Node::Literal { fp64, .. } => *fp64,
            Node::Lane(vector, _) => vector.needs_fp64(),
            Node::Unary(_, operand) => operand.needs_fp64(),
            Node::Binary(_, lhs, rhs) => lhs.needs_fp64() || rhs.needs_fp64(),
            Node::Call(_, args) => args.iter().any(Node::needs_fp64),
        }
    }
}

/// An expression over the current element, see the [module documentation](self).
#[derive(Clone, Debug)]
pub struct Expr(Node);

/// Conversion into an [`Expr`], constants become literals.
pub trait IntoExpr {
    /// Returns the expression.
    fn into_expr(self) -> Expr;
}

impl IntoExpr for Expr {
    fn into_expr(self) -> Expr {
        self
    }
}

impl<T: ClType> IntoExpr for T {
    fn into_expr(self) -> Expr {
        lit(self)
    }
}

/// A constant.
pub fn lit<T: ClType>(value: T) -> Expr {
    Expr(Node::Literal {
        source: value.literal(),
        fp64: T::FP64,
    })
}

/// Lane `lane` of a vector, `get(0, _1)` is `_1.s0`.
///
/// Panics if `lane` isn't a valid OpenCL vector component (0 to 15).
pub fn get(lane: usize, vector: impl IntoExpr) -> Expr {
    vector.into_expr().get(lane)
}

/// True if the condition holds for all lanes of a vector.
pub fn all(condition: impl IntoExpr) -> Expr {
    call("all", vec![condition.into_expr()])
}

/// True if the condition holds for any lane of a vector.
pub fn any(condition: impl IntoExpr) -> Expr {
    call("any", vec![condition.into_expr()])
}

/// A call of an OpenCL C built-in function, e.g. `call("fabs", vec![_1])`.
pub fn call(name: &str, args: Vec<Expr>) -> Expr {
    Expr(Node::Call(
        name.to_string(),
        args.into_iter().map(|arg| arg.0).collect(),
    ))
}

impl Expr {
    fn binary(self, op: &'static str, rhs: impl IntoExpr) -> Expr {
        Expr(Node::Binary(op, Box::new(self.0), Box::new(rhs.into_expr().0)))
    }

    /// Lane `lane` of a vector.
    ///
    /// Panics if `lane` isn't a valid OpenCL vector component (0 to 15).
    pub fn get(self, lane: usize) -> Expr {
        assert!(lane < 16, "OpenCL vectors have at most 16 lanes");
        Expr(Node::Lane(Box::new(self.0), lane))
    }

    /// `self == rhs`
    pub fn equal(self, rhs: impl IntoExpr) -> Expr {
        self.binary("==", rhs)
    }

    /// `self != rhs`
    pub fn not_equal(self, rhs: impl IntoExpr) -> Expr {
        self.binary("!=", rhs)
    }

    /// `self < rhs`
    pub fn lt(self, rhs: impl IntoExpr) -> Expr {
        self.binary("<", rhs)
    }

    /// `self <= rhs`
    pub fn le(self, rhs: impl IntoExpr) -> Expr {
        self.binary("<=", rhs)
    }

    /// `self > rhs`
    pub fn gt(self, rhs: impl IntoExpr) -> Expr {
        self.binary(">", rhs)
    }

    /// `self >= rhs`
    pub fn ge(self, rhs: impl IntoExpr) -> Expr {
        self.binary(">=", rhs)
    }

    /// `self && rhs`
    pub fn and(self, rhs: impl IntoExpr) -> Expr {
        self.binary("&&", rhs)
    }

    /// `self || rhs`
    pub fn or(self, rhs: impl IntoExpr) -> Expr {
        self.binary("||", rhs)
    }

    /// Renders the expression as OpenCL C, with `arg` in place of the placeholder.
    pub fn render(&self, arg: &str) -> String {
        let mut out = String::new();
        self.0.render(&mut out, arg);
        out
    }

    /// Whether the expression contains double precision constants.
    pub fn needs_fp64(&self) -> bool {
        self.0.needs_fp64()
    }
}

macro_rules! binary_operator {
    ($trait:ident, $method:ident, $op:literal) => {
        impl<R: IntoExpr> $trait<R> for Expr {
            type Output = Expr;

            fn $method(self, rhs: R) -> Expr {
                self.binary($op, rhs)
            }
        }
    };
}

binary_operator!(Add, add, "+");
binary_operator!(Sub, sub, "-");
binary_operator!(Mul, mul, "*");
binary_operator!(Div, div, "/");
binary_operator!(Rem, rem, "%");
binary_operator!(BitAnd, bitand, "&");
binary_operator!(BitOr, bitor, "|");
binary_operator!(BitXor, bitxor, "^");

impl Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Expr {
        Expr(Node::Unary("-", Box::new(self.0)))
    }
}

/// Logical negation, `!x` in OpenCL C.
impl Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        Expr(Node::Unary("!", Box::new(self.0)))
    }
}

/// A function that decides whether an element is counted, found, ...
pub trait Predicate {
    /// Adds everything the predicate needs to the kernel and returns a boolean OpenCL C
    /// expression applying it to the variable `value`.
    fn apply(&self, kernel: &mut MetaKernel<'_>, value: &str) -> String;
}

impl Predicate for Expr {
    fn apply(&self, kernel: &mut MetaKernel<'_>, value: &str) -> String {
        if self.needs_fp64() {
            kernel.enable_fp64();
        }
        self.render(value)
    }
}

impl<P: Predicate + ?Sized> Predicate for &P {
    fn apply(&self, kernel: &mut MetaKernel<'_>, value: &str) -> String {
        (**self).apply(kernel, value)
    }
}

/// A user defined OpenCL C function taking a single element.
///
/// ```
/// use rust_gpu_compute::lambda::Function;
///
/// let is_odd = Function::new("is_odd", "bool is_odd(int x) { return x & 1; }");
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Function {
    name: String,
    source: String,
}

impl Function {
    /// Creates a function from its name and its complete definition.
    pub fn new(name: &str, source: &str) -> Self {
        Self {
            name: name.to_string(),
            source: source.to_string(),
        }
    }

    /// The name the function is called by.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Predicate for Function {
    fn apply(&self, kernel: &mut MetaKernel<'_>, value: &str) -> String {
        kernel.add_function(&self.source);
        format!("{}({})", self.name, value)
    }
}
