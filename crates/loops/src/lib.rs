mod atomic;
mod builder;
mod jacobian;
mod registry;

use adcg::{id, Direction};
use enumset::EnumSetType;

pub use atomic::{LoopAtomic, LoopPosition, Positions};
pub use builder::LoopBuilder;
pub use jacobian::{Contribution, Jacobians, LoopJacobian, TapeElement};
pub use registry::{LoopGraph, Registry};

/// The evaluation orders a loop subgraph can be generated for.
#[derive(Debug, Hash, EnumSetType)]
pub enum Order {
    Forward0,
    Forward1,
    Reverse1,
}

impl Order {
    /// The evaluation order requested by a loop call.
    pub fn of(loop_id: id::Loop, direction: Direction, order: usize) -> Result<Self, Error> {
        match (direction, order) {
            (Direction::Forward, 0) => Ok(Order::Forward0),
            (Direction::Forward, 1) => Ok(Order::Forward1),
            (Direction::Reverse, 1) => Ok(Order::Reverse1),
            (Direction::Reverse, 0) => Err(Error::InvalidOrder {
                loop_id,
                direction,
                order,
            }),
            _ => Err(Error::UnsupportedOrder {
                loop_id,
                direction,
                order,
            }),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("loop result {node:?} must have a single loop call argument")]
    MalformedResult { node: id::Node },

    #[error("loop {} is not registered", .loop_id.loop_id())]
    UnknownLoop { loop_id: id::Loop },

    #[error("loop {}: {direction:?} order {order} is not an evaluation order", .loop_id.loop_id())]
    InvalidOrder {
        loop_id: id::Loop,
        direction: Direction,
        order: usize,
    },

    #[error("loop {}: {direction:?} order {order} is not implemented", .loop_id.loop_id())]
    UnsupportedOrder {
        loop_id: id::Loop,
        direction: Direction,
        order: usize,
    },

    #[error("loop {}: {order:?} call expects {expected} arguments, found {found}", .loop_id.loop_id())]
    ArgCount {
        loop_id: id::Loop,
        order: Order,
        expected: usize,
        found: usize,
    },

    #[error("loop {}: no Jacobian pattern for {order:?}", .loop_id.loop_id())]
    MissingJacobian { loop_id: id::Loop, order: Order },

    #[error("loop {}: {order:?} contribution refers to tape variable {index}, which is out of range", .loop_id.loop_id())]
    JacobianRange {
        loop_id: id::Loop,
        order: Order,
        index: usize,
    },

    #[error("loop {}: {order:?} evaluation of the tape failed", .loop_id.loop_id())]
    Tape {
        loop_id: id::Loop,
        order: Order,
        #[source]
        source: adcg::Error,
    },

    #[error("loop {}: table {index} has {found} positions for {expected} iterations", .loop_id.loop_id())]
    IterationCount {
        loop_id: id::Loop,
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("loop {}: positions describe {expected} tape inputs but the tape has {found}", .loop_id.loop_id())]
    Domain {
        loop_id: id::Loop,
        expected: usize,
        found: usize,
    },

    #[error("loop {}: positions describe {expected} tape outputs but the tape has {found}", .loop_id.loop_id())]
    Range {
        loop_id: id::Loop,
        expected: usize,
        found: usize,
    },
}
