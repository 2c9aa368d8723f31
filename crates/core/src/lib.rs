pub mod id;
pub mod pattern;
mod pprint;

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub use pattern::{IndexPattern, Linear, Sections};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("first section of an index pattern is empty")]
    EmptySection,

    #[error("evaluation order {order} is not supported")]
    UnsupportedOrder { order: usize },

    #[error("expected {expected} arguments, found {found}")]
    ArgCount { expected: usize, found: usize },
}

/// An operand: either a node in the graph or an inlined constant.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug)]
pub enum Arg {
    Node(id::Node),
    Const(f64),
}

impl Arg {
    pub fn node(self) -> Option<id::Node> {
        match self {
            Arg::Node(id) => Some(id),
            Arg::Const(_) => None,
        }
    }

    pub fn constant(self) -> Option<f64> {
        match self {
            Arg::Node(_) => None,
            Arg::Const(val) => Some(val),
        }
    }

    /// Whether this is a constant that is exactly zero, as opposed to a value that merely might be.
    pub fn is_zero(self) -> bool {
        self.constant() == Some(0.)
    }

    pub fn is_one(self) -> bool {
        self.constant() == Some(1.)
    }
}

impl From<id::Node> for Arg {
    fn from(id: id::Node) -> Self {
        Arg::Node(id)
    }
}

impl From<f64> for Arg {
    fn from(val: f64) -> Self {
        Arg::Const(val)
    }
}

// constants compare by bit pattern so that interning stays consistent with `Hash`
impl PartialEq for Arg {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Arg::Node(a), Arg::Node(b)) => a == b,
            (Arg::Const(a), Arg::Const(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }
}

impl Eq for Arg {}

impl Hash for Arg {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Arg::Node(id) => {
                0u8.hash(state);
                id.hash(state);
            }
            Arg::Const(val) => {
                1u8.hash(state);
                val.to_bits().hash(state);
            }
        }
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Unop {
    Neg,
    Sqrt,
    Exp,
    Log,
    Sin,
    Cos,
}

impl Unop {
    pub fn eval(self, x: f64) -> f64 {
        match self {
            Unop::Neg => -x,
            Unop::Sqrt => x.sqrt(),
            Unop::Exp => x.exp(),
            Unop::Log => x.ln(),
            Unop::Sin => x.sin(),
            Unop::Cos => x.cos(),
        }
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Binop {
    Add,
    Sub,
    Mul,
    Div,
}

impl Binop {
    pub fn eval(self, a: f64, b: f64) -> f64 {
        match self {
            Binop::Add => a + b,
            Binop::Sub => a - b,
            Binop::Mul => a * b,
            Binop::Div => a / b,
        }
    }
}

/// Direction in which a loop call propagates derivatives.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Forward,
    Reverse,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    /// Independent variable `index` of the generated function.
    Inv { index: usize },

    Unary { op: Unop },
    Binary { op: Binop },

    /// Temporary array holding its arguments.
    Array,

    /// A recorded call of a loop atomic function, with the occurrence's arguments.
    LoopCall {
        loop_id: id::Loop,
        direction: Direction,
        order: usize,
    },

    /// Output `output` of a loop call that has not been bound to a loop subgraph yet. Its single
    /// argument is the loop call.
    LoopResult { output: usize },

    /// A loop result after its loop subgraph was built. Its single argument is the loop end, and
    /// `dependent` is its position in the dependent variable list.
    LoopOutput { dependent: usize },

    /// Declares the temporaries that the loop body consumes.
    LoopStart { loop_id: id::Loop, iterations: usize },

    /// Closes a loop body; the arguments are its indexed results.
    LoopEnd { loop_id: id::Loop, iterations: usize },

    /// Tape input `column` inside a loop body. The arguments are the loop start followed by one
    /// source per iteration.
    IndexedIndep { column: usize, pattern: id::Pattern },

    /// Derivative seed for tape input (forward) or tape output (reverse) `index`. It has no
    /// arguments and is bound by index when the loop is emitted.
    LoopSeed { index: usize },

    /// One value produced per iteration, stored at the offsets described by `pattern`.
    IndexedDep { pattern: id::Pattern },
}

impl Op {
    /// Pure operations are interned; everything else has identity and may be mutated.
    pub fn is_pure(self) -> bool {
        matches!(
            self,
            Op::Inv { .. } | Op::Unary { .. } | Op::Binary { .. } | Op::Array
        )
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Node {
    pub op: Op,
    pub args: Vec<Arg>,
}

/// Owns every node of one code generation run.
#[derive(Debug, Default)]
pub struct Graph {
    nodes: Vec<Node>,
    interned: HashMap<Node, id::Node>,
    /// Index patterns referenced by slot from indexed nodes; append-only.
    patterns: Vec<IndexPattern>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: id::Node) -> &Node {
        &self.nodes[id.node()]
    }

    pub fn op(&self, id: id::Node) -> Op {
        self.nodes[id.node()].op
    }

    pub fn args(&self, id: id::Node) -> &[Arg] {
        &self.nodes[id.node()].args
    }

    pub fn nodes(&self) -> impl Iterator<Item = (id::Node, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (id::node(i), node))
    }

    fn push(&mut self, node: Node) -> id::Node {
        let id = id::node(self.nodes.len());
        self.nodes.push(node);
        id
    }

    /// Add a node, reusing an existing one if the operation is pure and structurally identical.
    pub fn insert(&mut self, op: Op, args: Vec<Arg>) -> id::Node {
        let node = Node { op, args };
        if !op.is_pure() {
            return self.push(node);
        }
        if let Some(&id) = self.interned.get(&node) {
            return id;
        }
        let id = self.push(node.clone());
        self.interned.insert(node, id);
        id
    }

    pub fn independent(&mut self, index: usize) -> Arg {
        Arg::Node(self.insert(Op::Inv { index }, vec![]))
    }

    /// Append an argument to a node with identity, such as a loop start or loop end.
    ///
    /// Any slice previously obtained from [`Graph::args`] for this node is stale afterwards.
    pub fn push_arg(&mut self, id: id::Node, arg: Arg) {
        let node = &mut self.nodes[id.node()];
        assert!(!node.op.is_pure(), "interned node {id:?} cannot be mutated");
        node.args.push(arg);
    }

    /// Replace the operation and arguments of a node with identity in place.
    ///
    /// This is how a loop result becomes a loop output once its subgraph exists; every reference
    /// to the node stays valid but any slice of its old arguments does not.
    pub fn rewrite(&mut self, id: id::Node, op: Op, args: Vec<Arg>) {
        let node = &mut self.nodes[id.node()];
        assert!(
            !node.op.is_pure() && !op.is_pure(),
            "interned node {id:?} cannot be rewritten"
        );
        node.op = op;
        node.args = args;
    }

    pub fn push_pattern(&mut self, pattern: IndexPattern) -> id::Pattern {
        let id = id::pattern(self.patterns.len());
        self.patterns.push(pattern);
        id
    }

    pub fn pattern(&self, id: id::Pattern) -> &IndexPattern {
        &self.patterns[id.pattern()]
    }

    pub fn patterns(&self) -> &[IndexPattern] {
        &self.patterns
    }

    pub fn unary(&mut self, op: Unop, arg: Arg) -> Arg {
        match arg {
            Arg::Const(val) => Arg::Const(op.eval(val)),
            Arg::Node(_) => Arg::Node(self.insert(Op::Unary { op }, vec![arg])),
        }
    }

    pub fn binary(&mut self, op: Binop, left: Arg, right: Arg) -> Arg {
        if let (Arg::Const(a), Arg::Const(b)) = (left, right) {
            return Arg::Const(op.eval(a, b));
        }
        match op {
            Binop::Add if left.is_zero() => return right,
            Binop::Add | Binop::Sub if right.is_zero() => return left,
            Binop::Sub if left.is_zero() => return self.unary(Unop::Neg, right),
            Binop::Mul if left.is_zero() || right.is_zero() => return Arg::Const(0.),
            Binop::Mul if left.is_one() => return right,
            Binop::Mul | Binop::Div if right.is_one() => return left,
            Binop::Div if left.is_zero() => return Arg::Const(0.),
            _ => {}
        }
        Arg::Node(self.insert(Op::Binary { op }, vec![left, right]))
    }

    pub fn neg(&mut self, arg: Arg) -> Arg {
        self.unary(Unop::Neg, arg)
    }

    pub fn add(&mut self, left: Arg, right: Arg) -> Arg {
        self.binary(Binop::Add, left, right)
    }

    pub fn sub(&mut self, left: Arg, right: Arg) -> Arg {
        self.binary(Binop::Sub, left, right)
    }

    pub fn mul(&mut self, left: Arg, right: Arg) -> Arg {
        self.binary(Binop::Mul, left, right)
    }

    pub fn div(&mut self, left: Arg, right: Arg) -> Arg {
        self.binary(Binop::Div, left, right)
    }
}

/// A recorded sub-computation that can be replayed symbolically into a [`Graph`].
///
/// Every method may add nodes to `graph`.
pub trait Tape {
    /// Number of inputs.
    fn domain(&self) -> usize;

    /// Number of outputs.
    fn range(&self) -> usize;

    /// Forward propagation of the given `order`.
    ///
    /// For order zero `tx` holds the inputs and the result holds the outputs. For order one both
    /// are interleaved as `[x0, dx0, x1, dx1, ...]`.
    fn forward(&self, graph: &mut Graph, order: usize, tx: &[Arg]) -> Result<Vec<Arg>, Error>;

    /// Reverse propagation of the given `order` at the point `x`, returning one adjoint per input
    /// for the output adjoints `py`.
    fn reverse(
        &self,
        graph: &mut Graph,
        order: usize,
        x: &[Arg],
        py: &[Arg],
    ) -> Result<Vec<Arg>, Error>;

    fn evaluate(&self, graph: &mut Graph, x: &[Arg]) -> Result<Vec<Arg>, Error> {
        self.forward(graph, 0, x)
    }
}
