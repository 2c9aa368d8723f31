#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Index of a node in the graph store.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Node(usize);

pub const fn node(id: usize) -> Node {
    Node(id)
}

impl Node {
    pub fn node(self) -> usize {
        self.0
    }
}

/// Index of an entry in the graph's index pattern list.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pattern(usize);

pub const fn pattern(id: usize) -> Pattern {
    Pattern(id)
}

impl Pattern {
    pub fn pattern(self) -> usize {
        self.0
    }
}

/// Identifier of a repeated atomic call site.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Loop(usize);

pub const fn loop_id(id: usize) -> Loop {
    Loop(id)
}

impl Loop {
    pub fn loop_id(self) -> usize {
        self.0
    }
}
