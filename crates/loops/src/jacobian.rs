use adcg::{id, Arg, IndexPattern};
use std::collections::{BTreeMap, HashMap};

/// How one element of a tape Jacobian reaches the derivatives of the generated function.
#[derive(Clone, Debug, PartialEq)]
pub struct Contribution {
    /// The seed direction in forward mode, or the Jacobian element factor in reverse mode.
    pub arg: Arg,
    /// Where the product is stored, per iteration.
    pub pattern: IndexPattern,
}

/// Contributions of one tape element, keyed by the original independent they belong to.
pub type TapeElement = BTreeMap<usize, Contribution>;

/// Sparse tape Jacobian of one loop, outer key first.
///
/// As built by the caller the outer key is the tape output (row) and the inner key the tape
/// input (column); [`LoopJacobian::transpose`] swaps them for forward mode.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoopJacobian {
    outer: BTreeMap<usize, BTreeMap<usize, TapeElement>>,
}

impl LoopJacobian {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, outer: usize, inner: usize, original: usize, contrib: Contribution) {
        self.outer
            .entry(outer)
            .or_default()
            .entry(inner)
            .or_default()
            .insert(original, contrib);
    }

    pub fn get(&self, outer: usize) -> Option<&BTreeMap<usize, TapeElement>> {
        self.outer.get(&outer)
    }

    pub fn is_empty(&self) -> bool {
        self.outer.is_empty()
    }

    pub fn transpose(&self) -> Self {
        let mut transposed = Self::new();
        for (&r, inner) in &self.outer {
            for (&c, element) in inner {
                transposed.outer.entry(c).or_default().insert(r, element.clone());
            }
        }
        transposed
    }
}

/// Jacobian patterns of every loop, as passed to [`crate::LoopBuilder::prepare_loops`].
pub type Jacobians = HashMap<id::Loop, LoopJacobian>;
