mod ids;

use adcg::{id, Graph, IndexPattern, Linear, Op};
use std::fmt::Write;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub use ids::{assign_ids, Ids};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("node {node:?} has no variable id")]
    UnassignedVariable { node: id::Node },

    #[error("node {node:?} is not a temporary variable")]
    NotATemporary { node: id::Node },

    #[error("node {node:?} is not a temporary array")]
    NotAnArray { node: id::Node },

    #[error("node {node:?} is not an indexed loop variable")]
    NotIndexed { node: id::Node },
}

/// Base names used in generated code.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NameConfig {
    pub dependent: String,
    pub independent: String,
    pub temporary: String,
    pub temporary_array: String,
    /// Whether temporaries live in one array instead of being separate scalars.
    pub temporary_as_array: bool,
    /// Loop counter in index expressions.
    pub index: String,
}

impl Default for NameConfig {
    fn default() -> Self {
        Self {
            dependent: "y".to_owned(),
            independent: "x".to_owned(),
            temporary: "var".to_owned(),
            temporary_array: "array".to_owned(),
            temporary_as_array: false,
            index: "j".to_owned(),
        }
    }
}

/// Produces the source text of variable references.
#[derive(Clone, Debug)]
pub struct VariableNames {
    config: NameConfig,
    min: usize,
    max: usize,
    max_array: usize,
}

impl VariableNames {
    pub fn new(config: NameConfig) -> Self {
        Self {
            config,
            min: 1,
            max: 0,
            max_array: 0,
        }
    }

    pub fn config(&self) -> &NameConfig {
        &self.config
    }

    /// Record the id bounds of temporaries; `min == max + 1` means there are none.
    pub fn set_temporary_ids(&mut self, min: usize, max: usize, max_array: usize) {
        assert!(
            min <= max + 1,
            "temporary ids {min}..={max} are not a valid range"
        );
        self.min = min;
        self.max = max;
        self.max_array = max_array;
    }

    pub fn set_ids(&mut self, ids: &Ids) {
        self.set_temporary_ids(ids.min, ids.max, ids.max_array);
    }

    pub fn min_temporary_id(&self) -> usize {
        self.min
    }

    pub fn max_temporary_id(&self) -> usize {
        self.max
    }

    pub fn max_temporary_array_id(&self) -> usize {
        self.max_array
    }

    pub fn dependent(&self, index: usize) -> String {
        format!("{}[{index}]", self.config.dependent)
    }

    fn id(ids: &Ids, node: id::Node) -> Result<usize, Error> {
        ids.get(node).ok_or(Error::UnassignedVariable { node })
    }

    pub fn independent(&self, ids: &Ids, node: id::Node) -> Result<String, Error> {
        let id = Self::id(ids, node)?;
        Ok(format!("{}[{}]", self.config.independent, id - 1))
    }

    pub fn temporary(&self, graph: &Graph, ids: &Ids, node: id::Node) -> Result<String, Error> {
        if !matches!(graph.op(node), Op::Unary { .. } | Op::Binary { .. }) {
            return Err(Error::NotATemporary { node });
        }
        let id = Self::id(ids, node)?;
        if id < self.min {
            return Err(Error::NotATemporary { node });
        }
        Ok(if self.config.temporary_as_array {
            format!("{}[{}]", self.config.temporary, id - self.min)
        } else {
            format!("{}{id}", self.config.temporary)
        })
    }

    /// Address of the first element of a temporary array.
    pub fn temporary_array(
        &self,
        graph: &Graph,
        ids: &Ids,
        node: id::Node,
    ) -> Result<String, Error> {
        if graph.op(node) != Op::Array {
            return Err(Error::NotAnArray { node });
        }
        let id = Self::id(ids, node)?;
        Ok(format!("&{}[{}]", self.config.temporary_array, id - 1))
    }

    pub fn indexed_dependent(&self, graph: &Graph, node: id::Node) -> Result<String, Error> {
        match graph.op(node) {
            Op::IndexedDep { pattern } => Ok(format!(
                "{}[{}]",
                self.config.dependent,
                self.index_expr(graph.pattern(pattern))
            )),
            _ => Err(Error::NotIndexed { node }),
        }
    }

    pub fn indexed_independent(&self, graph: &Graph, node: id::Node) -> Result<String, Error> {
        match graph.op(node) {
            Op::IndexedIndep { pattern, .. } => Ok(format!(
                "{}[{}]",
                self.config.independent,
                self.index_expr(graph.pattern(pattern))
            )),
            _ => Err(Error::NotIndexed { node }),
        }
    }

    /// Source expression of `pattern` in terms of the loop counter.
    ///
    /// # Panics
    ///
    /// If the pattern is random, which has no closed form.
    pub fn index_expr(&self, pattern: &IndexPattern) -> String {
        index_expr(&self.config.index, pattern)
    }
}

impl Default for VariableNames {
    fn default() -> Self {
        Self::new(NameConfig::default())
    }
}

fn linear_expr(s: &mut String, index: &str, line: Linear) {
    let Linear { slope, constant } = line;
    match slope {
        0 => {}
        1 => s.push_str(index),
        -1 => {
            let _ = write!(s, "-{index}");
        }
        _ => {
            let _ = write!(s, "{slope} * {index}");
        }
    }
    if slope == 0 {
        let _ = write!(s, "{constant}");
    } else if constant > 0 {
        let _ = write!(s, " + {constant}");
    } else if constant < 0 {
        let _ = write!(s, " - {}", constant.unsigned_abs());
    }
}

/// Source expression of `pattern` with loop counter `index`.
///
/// # Panics
///
/// If the pattern is random, which has no closed form.
pub fn index_expr(index: &str, pattern: &IndexPattern) -> String {
    let mut s = String::new();
    match pattern {
        &IndexPattern::Linear(line) => linear_expr(&mut s, index, line),
        &IndexPattern::Sections(sections) => {
            let _ = write!(s, "({index}<{})? ", sections.split());
            linear_expr(&mut s, index, sections.first());
            s.push_str(": ");
            linear_expr(&mut s, index, sections.second());
        }
        IndexPattern::Random { .. } => panic!("random index pattern has no source expression"),
    }
    s
}
