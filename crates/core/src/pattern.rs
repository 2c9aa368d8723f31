#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::Error;

/// Affine map `iteration -> slope * iteration + constant`.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Linear {
    pub slope: i64,
    pub constant: i64,
}

impl Linear {
    pub const fn new(slope: i64, constant: i64) -> Self {
        Self { slope, constant }
    }

    pub fn offset(self, iteration: usize) -> i64 {
        self.slope * iteration as i64 + self.constant
    }

    /// The line through `offsets[start]` and `offsets[start + 1]`, together with the end of the
    /// longest run of offsets starting at `start` that it reproduces.
    fn fit(offsets: &[usize], start: usize) -> (Self, usize) {
        let first = offsets[start] as i64;
        let slope = match offsets.get(start + 1) {
            Some(&next) => next as i64 - first,
            None => 0,
        };
        let line = Self::new(slope, first - slope * start as i64);
        let end = offsets[start..]
            .iter()
            .enumerate()
            .find(|&(i, &offset)| line.offset(start + i) != offset as i64)
            .map_or(offsets.len(), |(i, _)| start + i);
        (line, end)
    }
}

/// Two affine pieces: iterations below `split` use `first`, the rest use `second`.
///
/// Only built through [`IndexPattern::sections`] or [`IndexPattern::detect`], so `split` is never
/// zero and the pieces differ.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Sections {
    split: usize,
    first: Linear,
    second: Linear,
}

impl Sections {
    pub fn split(self) -> usize {
        self.split
    }

    pub fn first(self) -> Linear {
        self.first
    }

    pub fn second(self) -> Linear {
        self.second
    }

    pub fn offset(self, iteration: usize) -> i64 {
        if iteration < self.split {
            self.first.offset(iteration)
        } else {
            self.second.offset(iteration)
        }
    }
}

/// Closed-form mapping from a loop iteration counter to an array offset.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum IndexPattern {
    Linear(Linear),

    Sections(Sections),

    /// No closed form was found; the raw offsets are kept but cannot be rendered.
    Random { offsets: Box<[usize]> },
}

impl IndexPattern {
    pub const fn linear(slope: i64, constant: i64) -> Self {
        Self::Linear(Linear::new(slope, constant))
    }

    /// Two affine sections selected by `iteration < split`.
    ///
    /// A split of zero would leave `first` unreachable, which is rejected instead of silently
    /// collapsing to `second`. Identical sections collapse to a single line.
    pub fn sections(split: usize, first: Linear, second: Linear) -> Result<Self, Error> {
        if split == 0 {
            return Err(Error::EmptySection);
        }
        if first == second {
            return Ok(Self::Linear(first));
        }
        Ok(Self::Sections(Sections {
            split,
            first,
            second,
        }))
    }

    /// Find the simplest pattern reproducing `offsets`, indexed by iteration.
    pub fn detect(offsets: &[usize]) -> Self {
        if offsets.is_empty() {
            return Self::linear(0, 0);
        }
        let (first, split) = Linear::fit(offsets, 0);
        if split == offsets.len() {
            return Self::Linear(first);
        }
        let (second, end) = Linear::fit(offsets, split);
        if end == offsets.len() {
            return Self::Sections(Sections {
                split,
                first,
                second,
            });
        }
        Self::Random {
            offsets: offsets.into(),
        }
    }

    pub fn offset(&self, iteration: usize) -> Option<i64> {
        match self {
            Self::Linear(line) => Some(line.offset(iteration)),
            Self::Sections(sections) => Some(sections.offset(iteration)),
            Self::Random { offsets } => offsets.get(iteration).map(|&offset| offset as i64),
        }
    }

    pub fn is_random(&self) -> bool {
        matches!(self, Self::Random { .. })
    }
}
