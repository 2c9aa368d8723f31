use crate::Error;
use adcg::{id, IndexPattern, Tape};
use std::rc::Rc;

/// Where one tape variable of one iteration lives outside the loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LoopPosition {
    /// Index in the arguments (or results) of the loop call.
    pub atomic: usize,
    /// Index in the independents (or dependents) of the generated function.
    pub original: usize,
}

impl LoopPosition {
    pub const fn new(atomic: usize, original: usize) -> Self {
        Self { atomic, original }
    }
}

/// Position tables of a loop call under construction. Not guaranteed to be consistent.
///
/// Tape inputs are ordered as all indexed columns, then the non-indexed ones, then the
/// temporaries.
#[derive(Clone, Debug, Default)]
pub struct Positions {
    /// One table per indexed tape input, one position per iteration.
    pub indexed: Vec<Vec<LoopPosition>>,
    /// Tape inputs that take the same value in every iteration.
    pub non_indexed: Vec<LoopPosition>,
    /// Iteration-invariant intermediate values; only `atomic` is meaningful.
    pub temporaries: Vec<LoopPosition>,
    /// One table per tape output, one position per iteration.
    pub dependents: Vec<Vec<LoopPosition>>,
}

/// Immutable description of one repeated atomic call site.
pub struct LoopAtomic {
    loop_id: id::Loop,
    iterations: usize,
    tape: Rc<dyn Tape>,
    positions: Positions,
    indexed_patterns: Vec<IndexPattern>,
    dependent_patterns: Vec<IndexPattern>,
    independent_count: usize,
    dependent_count: usize,
}

fn check_iterations(
    loop_id: id::Loop,
    iterations: usize,
    tables: &[Vec<LoopPosition>],
) -> Result<(), Error> {
    for (index, table) in tables.iter().enumerate() {
        if table.len() != iterations {
            return Err(Error::IterationCount {
                loop_id,
                index,
                expected: iterations,
                found: table.len(),
            });
        }
    }
    Ok(())
}

fn patterns(tables: &[Vec<LoopPosition>]) -> Vec<IndexPattern> {
    tables
        .iter()
        .map(|table| {
            let offsets: Vec<usize> = table.iter().map(|pos| pos.original).collect();
            IndexPattern::detect(&offsets)
        })
        .collect()
}

impl LoopAtomic {
    pub fn new(
        loop_id: id::Loop,
        iterations: usize,
        tape: Rc<dyn Tape>,
        positions: Positions,
    ) -> Result<Self, Error> {
        check_iterations(loop_id, iterations, &positions.indexed)?;
        check_iterations(loop_id, iterations, &positions.dependents)?;

        let domain = positions.indexed.len()
            + positions.non_indexed.len()
            + positions.temporaries.len();
        if tape.domain() != domain {
            return Err(Error::Domain {
                loop_id,
                expected: domain,
                found: tape.domain(),
            });
        }
        if tape.range() != positions.dependents.len() {
            return Err(Error::Range {
                loop_id,
                expected: positions.dependents.len(),
                found: tape.range(),
            });
        }

        let independent_count = positions
            .indexed
            .iter()
            .flatten()
            .chain(&positions.non_indexed)
            .chain(&positions.temporaries)
            .map(|pos| pos.atomic + 1)
            .max()
            .unwrap_or(0);
        let dependent_count = positions
            .dependents
            .iter()
            .flatten()
            .map(|pos| pos.atomic + 1)
            .max()
            .unwrap_or(0);

        Ok(Self {
            loop_id,
            iterations,
            tape,
            indexed_patterns: patterns(&positions.indexed),
            dependent_patterns: patterns(&positions.dependents),
            positions,
            independent_count,
            dependent_count,
        })
    }

    pub fn loop_id(&self) -> id::Loop {
        self.loop_id
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn tape(&self) -> &dyn Tape {
        self.tape.as_ref()
    }

    pub fn indexed_indeps(&self) -> &[Vec<LoopPosition>] {
        &self.positions.indexed
    }

    pub fn non_indexed_indeps(&self) -> &[LoopPosition] {
        &self.positions.non_indexed
    }

    pub fn temporary_indeps(&self) -> &[LoopPosition] {
        &self.positions.temporaries
    }

    pub fn dependents(&self) -> &[Vec<LoopPosition>] {
        &self.positions.dependents
    }

    /// Index pattern of every indexed tape input over the independents.
    pub fn indexed_patterns(&self) -> &[IndexPattern] {
        &self.indexed_patterns
    }

    /// Index pattern of every tape output over the dependents.
    pub fn dependent_patterns(&self) -> &[IndexPattern] {
        &self.dependent_patterns
    }

    /// Number of arguments of a value call.
    pub fn independent_count(&self) -> usize {
        self.independent_count
    }

    /// Number of results of a value call.
    pub fn dependent_count(&self) -> usize {
        self.dependent_count
    }

    /// Argument position feeding tape input `column` in `iteration`.
    pub fn column_position(&self, column: usize, iteration: usize) -> usize {
        let indexed = self.positions.indexed.len();
        let non_indexed = self.positions.non_indexed.len();
        if column < indexed {
            self.positions.indexed[column][iteration].atomic
        } else if column < indexed + non_indexed {
            self.positions.non_indexed[column - indexed].atomic
        } else {
            self.positions.temporaries[column - indexed - non_indexed].atomic
        }
    }
}

impl std::fmt::Debug for LoopAtomic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopAtomic")
            .field("loop_id", &self.loop_id)
            .field("iterations", &self.iterations)
            .field("positions", &self.positions)
            .finish_non_exhaustive()
    }
}
