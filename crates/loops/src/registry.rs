use crate::{LoopAtomic, Order};
use adcg::id;
use enumset::EnumSet;
use indexmap::{IndexMap, IndexSet};
use std::rc::Rc;

/// The generic-iteration subgraph of one loop for one evaluation order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoopGraph {
    pub start: id::Node,
    /// One node per indexed tape input.
    pub indexed_indeps: Vec<id::Node>,
    /// Derivative seed placeholders: one per tape input in forward mode, one per tape output in
    /// reverse mode. Empty for order zero.
    pub seeds: Vec<id::Node>,
    /// Indexed results in the order they were appended to `end`.
    pub results: Vec<id::Node>,
    pub end: id::Node,
}

struct Descriptor {
    atomic: Rc<LoopAtomic>,
    forward0: Option<LoopGraph>,
    forward1: Option<LoopGraph>,
    reverse1: Option<LoopGraph>,
}

impl Descriptor {
    fn slot(&self, order: Order) -> &Option<LoopGraph> {
        match order {
            Order::Forward0 => &self.forward0,
            Order::Forward1 => &self.forward1,
            Order::Reverse1 => &self.reverse1,
        }
    }

    fn slot_mut(&mut self, order: Order) -> &mut Option<LoopGraph> {
        match order {
            Order::Forward0 => &mut self.forward0,
            Order::Forward1 => &mut self.forward1,
            Order::Reverse1 => &mut self.reverse1,
        }
    }
}

/// Per-loop state of one code generation run.
#[derive(Default)]
pub struct Registry {
    loops: IndexMap<id::Loop, Descriptor>,
    /// Tape columns (forward) or rows (reverse) already present in a cached subgraph.
    materialized: IndexSet<(id::Loop, Order, usize)>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    /// Install the descriptor for `atomic`'s loop, discarding any previous one with the same id
    /// together with its subgraphs.
    pub fn register(&mut self, atomic: LoopAtomic) {
        let loop_id = atomic.loop_id();
        let descriptor = Descriptor {
            atomic: Rc::new(atomic),
            forward0: None,
            forward1: None,
            reverse1: None,
        };
        if let Some(old) = self.loops.insert(loop_id, descriptor) {
            let orders: EnumSet<Order> = EnumSet::<Order>::all()
                .iter()
                .filter(|&order| old.slot(order).is_some())
                .collect();
            log::debug!("loop {}: re-registered, discarding {orders:?}", loop_id.loop_id());
            self.materialized.retain(|&(id, _, _)| id != loop_id);
        }
    }

    pub fn lookup(&self, loop_id: id::Loop) -> Option<&LoopAtomic> {
        self.loops.get(&loop_id).map(|d| d.atomic.as_ref())
    }

    pub(crate) fn atomic(&self, loop_id: id::Loop) -> Option<Rc<LoopAtomic>> {
        self.loops.get(&loop_id).map(|d| Rc::clone(&d.atomic))
    }

    pub fn graph(&self, loop_id: id::Loop, order: Order) -> Option<&LoopGraph> {
        self.loops.get(&loop_id)?.slot(order).as_ref()
    }

    pub(crate) fn graph_mut(
        &mut self,
        loop_id: id::Loop,
        order: Order,
    ) -> Option<&mut LoopGraph> {
        self.loops.get_mut(&loop_id)?.slot_mut(order).as_mut()
    }

    pub(crate) fn set_graph(&mut self, loop_id: id::Loop, order: Order, graph: LoopGraph) {
        if let Some(d) = self.loops.get_mut(&loop_id) {
            let slot = d.slot_mut(order);
            assert!(slot.is_none(), "loop {loop_id:?} already has a {order:?} subgraph");
            *slot = Some(graph);
        }
    }

    /// Evaluation orders for which `loop_id` currently has a subgraph.
    pub fn orders(&self, loop_id: id::Loop) -> EnumSet<Order> {
        match self.loops.get(&loop_id) {
            Some(d) => EnumSet::<Order>::all()
                .iter()
                .filter(|&order| d.slot(order).is_some())
                .collect(),
            None => EnumSet::empty(),
        }
    }

    pub fn is_materialized(&self, loop_id: id::Loop, order: Order, index: usize) -> bool {
        self.materialized.contains(&(loop_id, order, index))
    }

    /// Returns `false` if the entry was already present.
    pub fn mark_materialized(&mut self, loop_id: id::Loop, order: Order, index: usize) -> bool {
        self.materialized.insert((loop_id, order, index))
    }

    /// Materialized columns or rows in the order they were first built.
    pub fn materialized(&self, loop_id: id::Loop, order: Order) -> Vec<usize> {
        self.materialized
            .iter()
            .filter(|&&(id, o, _)| id == loop_id && o == order)
            .map(|&(_, _, index)| index)
            .collect()
    }
}
