use crate::{
    Error, Jacobians, LoopAtomic, LoopGraph, LoopJacobian, Order, Registry, TapeElement,
};
use adcg::{id, Arg, Graph, Op};
use std::collections::BTreeMap;

/// Collapses unrolled loop calls of one graph into shared generic-iteration subgraphs.
pub struct LoopBuilder<'a> {
    graph: &'a mut Graph,
    registry: &'a mut Registry,
    /// Whether derivative seeds vary per iteration and must be read from placeholders, instead
    /// of being the constant `1`.
    variable_seeds: bool,
}

impl<'a> LoopBuilder<'a> {
    pub fn new(graph: &'a mut Graph, registry: &'a mut Registry) -> Self {
        Self {
            graph,
            registry,
            variable_seeds: false,
        }
    }

    pub fn variable_seeds(mut self, variable: bool) -> Self {
        self.variable_seeds = variable;
        self
    }

    /// Rewrite every loop result in `dependents` to reference the loop end of its subgraph,
    /// building subgraphs as needed.
    ///
    /// `jacobians` holds the tape Jacobian pattern (rows are tape outputs) of every loop called
    /// at first order; it may be empty if all loop calls are of order zero.
    pub fn prepare_loops(
        &mut self,
        dependents: &[Arg],
        jacobians: &Jacobians,
    ) -> Result<(), Error> {
        for (i, &dep) in dependents.iter().enumerate() {
            if let Arg::Node(node) = dep {
                if let Op::LoopResult { .. } = self.graph.op(node) {
                    self.insert_loop_operations(i, node, jacobians)?;
                }
            }
        }
        log::trace!("graph after loop preparation:\n{}", self.graph);
        Ok(())
    }

    fn insert_loop_operations(
        &mut self,
        dependent: usize,
        result: id::Node,
        jacobians: &Jacobians,
    ) -> Result<(), Error> {
        let call = match self.graph.args(result) {
            &[Arg::Node(call)] => call,
            _ => return Err(Error::MalformedResult { node: result }),
        };
        let (loop_id, direction, order) = match self.graph.op(call) {
            Op::LoopCall {
                loop_id,
                direction,
                order,
            } => (loop_id, direction, order),
            _ => return Err(Error::MalformedResult { node: result }),
        };
        let order = Order::of(loop_id, direction, order)?;
        let atomic = self
            .registry
            .atomic(loop_id)
            .ok_or(Error::UnknownLoop { loop_id })?;
        let args = self.graph.args(call).to_vec();

        let end = match order {
            Order::Forward0 => self.forward0(&atomic, &args)?,
            Order::Forward1 => {
                let jac = jacobians
                    .get(&loop_id)
                    .ok_or(Error::MissingJacobian { loop_id, order })?;
                self.forward1(&atomic, &jac.transpose(), &args)?
            }
            Order::Reverse1 => {
                let jac = jacobians
                    .get(&loop_id)
                    .ok_or(Error::MissingJacobian { loop_id, order })?;
                self.reverse1(&atomic, jac, &args)?
            }
        };

        // the old argument list pointed at the loop call; it is gone after this
        self.graph
            .rewrite(result, Op::LoopOutput { dependent }, vec![Arg::Node(end)]);
        log::trace!(
            "loop {}: dependent {dependent} now reads {order:?} loop end {end:?}",
            loop_id.loop_id()
        );
        Ok(())
    }

    fn check_args(
        atomic: &LoopAtomic,
        order: Order,
        expected: usize,
        args: &[Arg],
    ) -> Result<(), Error> {
        if args.len() == expected {
            Ok(())
        } else {
            Err(Error::ArgCount {
                loop_id: atomic.loop_id(),
                order,
                expected,
                found: args.len(),
            })
        }
    }

    /// Make `arg` an input of the loop start, unless it is an independent or already declared.
    fn declare(&mut self, start: id::Node, arg: Arg) {
        let Arg::Node(node) = arg else {
            return;
        };
        if let Op::Inv { .. } = self.graph.op(node) {
            return;
        }
        if !self.graph.args(start).contains(&arg) {
            self.graph.push_arg(start, arg);
        }
    }

    fn declare_temporaries(
        &mut self,
        atomic: &LoopAtomic,
        start: id::Node,
        args: &[Arg],
        stride: usize,
    ) {
        for pos in atomic.temporary_indeps() {
            self.declare(start, args[pos.atomic * stride]);
        }
    }

    /// One node per indexed tape input, whose arguments are the loop start followed by the value
    /// of that input in every iteration. Values sit every `stride` arguments.
    fn indexed_independents(
        &mut self,
        atomic: &LoopAtomic,
        start: id::Node,
        args: &[Arg],
        stride: usize,
    ) -> Vec<id::Node> {
        atomic
            .indexed_indeps()
            .iter()
            .zip(atomic.indexed_patterns())
            .enumerate()
            .map(|(column, (table, pattern))| {
                let pattern = self.graph.push_pattern(pattern.clone());
                let mut sources = Vec::with_capacity(table.len() + 1);
                sources.push(Arg::Node(start));
                sources.extend(table.iter().map(|pos| args[pos.atomic * stride]));
                self.graph
                    .insert(Op::IndexedIndep { column, pattern }, sources)
            })
            .collect()
    }

    /// Tape inputs of a generic iteration: indexed placeholders, then non-indexed values, then
    /// temporaries.
    fn independent_vector(
        atomic: &LoopAtomic,
        indexed: &[id::Node],
        args: &[Arg],
        stride: usize,
    ) -> Vec<Arg> {
        let mut x: Vec<Arg> = indexed.iter().map(|&node| Arg::Node(node)).collect();
        x.extend(
            atomic
                .non_indexed_indeps()
                .iter()
                .chain(atomic.temporary_indeps())
                .map(|pos| args[pos.atomic * stride]),
        );
        x
    }

    fn tape_error(atomic: &LoopAtomic, order: Order) -> impl FnOnce(adcg::Error) -> Error {
        let loop_id = atomic.loop_id();
        move |source| Error::Tape {
            loop_id,
            order,
            source,
        }
    }

    fn loop_start(&mut self, atomic: &LoopAtomic) -> id::Node {
        self.graph.insert(
            Op::LoopStart {
                loop_id: atomic.loop_id(),
                iterations: atomic.iterations(),
            },
            vec![],
        )
    }

    fn loop_end(&mut self, atomic: &LoopAtomic, results: &[id::Node]) -> id::Node {
        self.graph.insert(
            Op::LoopEnd {
                loop_id: atomic.loop_id(),
                iterations: atomic.iterations(),
            },
            results.iter().map(|&node| Arg::Node(node)).collect(),
        )
    }

    /// The value subgraph, built on the first occurrence and shared by all later ones.
    fn forward0(&mut self, atomic: &LoopAtomic, args: &[Arg]) -> Result<id::Node, Error> {
        let loop_id = atomic.loop_id();
        let order = Order::Forward0;
        Self::check_args(atomic, order, atomic.independent_count(), args)?;
        if let Some(graph) = self.registry.graph(loop_id, order) {
            return Ok(graph.end);
        }

        let start = self.loop_start(atomic);
        self.declare_temporaries(atomic, start, args, 1);
        let indexed_indeps = self.indexed_independents(atomic, start, args, 1);

        let x = Self::independent_vector(atomic, &indexed_indeps, args, 1);
        let y = atomic
            .tape()
            .evaluate(self.graph, &x)
            .map_err(Self::tape_error(atomic, order))?;

        let results: Vec<id::Node> = y
            .into_iter()
            .zip(atomic.dependent_patterns())
            .map(|(val, pattern)| {
                let pattern = self.graph.push_pattern(pattern.clone());
                self.graph.insert(Op::IndexedDep { pattern }, vec![val])
            })
            .collect();
        let end = self.loop_end(atomic, &results);

        log::debug!(
            "loop {}: built {order:?} subgraph with {} results",
            loop_id.loop_id(),
            results.len()
        );
        self.registry.set_graph(
            loop_id,
            order,
            LoopGraph {
                start,
                indexed_indeps,
                seeds: vec![],
                results,
                end,
            },
        );
        Ok(end)
    }

    /// The cached derivative subgraph for `order`, allocating an empty one on first use.
    fn derivative_graph(
        &mut self,
        atomic: &LoopAtomic,
        order: Order,
        args: &[Arg],
        stride: usize,
    ) -> LoopGraph {
        let loop_id = atomic.loop_id();
        if let Some(graph) = self.registry.graph(loop_id, order) {
            return graph.clone();
        }

        let start = self.loop_start(atomic);
        let indexed_indeps = self.indexed_independents(atomic, start, args, stride);
        let seed_count = match order {
            Order::Reverse1 => atomic.tape().range(),
            _ => atomic.tape().domain(),
        };
        let seeds = (0..seed_count)
            .map(|index| self.graph.insert(Op::LoopSeed { index }, vec![]))
            .collect();
        // results are appended as columns or rows get materialized
        let end = self.loop_end(atomic, &[]);

        log::debug!("loop {}: allocated {order:?} subgraph", loop_id.loop_id());
        let graph = LoopGraph {
            start,
            indexed_indeps,
            seeds,
            results: vec![],
            end,
        };
        self.registry.set_graph(loop_id, order, graph.clone());
        graph
    }

    /// Multiply `derivs[index]` by every contribution of `elements`, appending one indexed
    /// result per product to the loop end.
    fn append_results(
        &mut self,
        atomic: &LoopAtomic,
        order: Order,
        graph: &LoopGraph,
        derivs: &[Arg],
        elements: Option<&BTreeMap<usize, TapeElement>>,
    ) -> Result<(), Error> {
        let loop_id = atomic.loop_id();
        for (&index, element) in elements.into_iter().flatten() {
            let deriv = *derivs.get(index).ok_or(Error::JacobianRange {
                loop_id,
                order,
                index,
            })?;
            for contrib in element.values() {
                if contrib.arg.is_zero() {
                    continue;
                }
                self.declare(graph.start, contrib.arg);
                let val = self.graph.mul(deriv, contrib.arg);
                let pattern = self.graph.push_pattern(contrib.pattern.clone());
                let result = self.graph.insert(Op::IndexedDep { pattern }, vec![val]);
                self.graph.push_arg(graph.end, Arg::Node(result));
                if let Some(cached) = self.registry.graph_mut(loop_id, order) {
                    cached.results.push(result);
                }
            }
        }
        Ok(())
    }

    /// First order forward mode. `jac` is keyed by tape input first; `args` interleaves every
    /// value with its tangent seed.
    fn forward1(
        &mut self,
        atomic: &LoopAtomic,
        jac: &LoopJacobian,
        args: &[Arg],
    ) -> Result<id::Node, Error> {
        let loop_id = atomic.loop_id();
        let order = Order::Forward1;
        Self::check_args(atomic, order, 2 * atomic.independent_count(), args)?;

        for column in 0..atomic.tape().domain() {
            if self.registry.is_materialized(loop_id, order, column) {
                continue;
            }
            let live = (0..atomic.iterations())
                .any(|it| !args[2 * atomic.column_position(column, it) + 1].is_zero());
            if live {
                self.forward1_column(atomic, column, jac, args)?;
                self.registry.mark_materialized(loop_id, order, column);
            }
        }

        // every seed may be zero, in which case the loop has no results
        Ok(self.derivative_graph(atomic, order, args, 2).end)
    }

    fn forward1_column(
        &mut self,
        atomic: &LoopAtomic,
        column: usize,
        jac: &LoopJacobian,
        args: &[Arg],
    ) -> Result<(), Error> {
        let order = Order::Forward1;
        let graph = self.derivative_graph(atomic, order, args, 2);
        self.declare_temporaries(atomic, graph.start, args, 2);

        let tape = atomic.tape();
        let x = Self::independent_vector(atomic, &graph.indexed_indeps, args, 2);
        tape.evaluate(self.graph, &x)
            .map_err(Self::tape_error(atomic, order))?;

        let mut tx = Vec::with_capacity(2 * x.len());
        for &xj in &x {
            tx.push(xj);
            tx.push(Arg::Const(0.));
        }
        tx[2 * column + 1] = if self.variable_seeds {
            Arg::Node(graph.seeds[column])
        } else {
            Arg::Const(1.)
        };
        let ty = tape
            .forward(self.graph, 1, &tx)
            .map_err(Self::tape_error(atomic, order))?;
        let dy: Vec<Arg> = ty.iter().skip(1).step_by(2).copied().collect();

        log::debug!(
            "loop {}: materializing tape input {column} for {order:?}",
            atomic.loop_id().loop_id()
        );
        self.append_results(atomic, order, &graph, &dy, jac.get(column))
    }

    /// First order reverse mode. `jac` is keyed by tape output first; `args` holds the values
    /// followed by the adjoint seeds of the call's results.
    fn reverse1(
        &mut self,
        atomic: &LoopAtomic,
        jac: &LoopJacobian,
        args: &[Arg],
    ) -> Result<id::Node, Error> {
        let loop_id = atomic.loop_id();
        let order = Order::Reverse1;
        let n = atomic.independent_count();
        Self::check_args(atomic, order, n + atomic.dependent_count(), args)?;

        for (row, table) in atomic.dependents().iter().enumerate() {
            if self.registry.is_materialized(loop_id, order, row) {
                continue;
            }
            let live = table.iter().any(|pos| !args[n + pos.atomic].is_zero());
            if live {
                self.reverse1_row(atomic, row, jac, args)?;
                self.registry.mark_materialized(loop_id, order, row);
            }
        }

        Ok(self.derivative_graph(atomic, order, args, 1).end)
    }

    fn reverse1_row(
        &mut self,
        atomic: &LoopAtomic,
        row: usize,
        jac: &LoopJacobian,
        args: &[Arg],
    ) -> Result<(), Error> {
        let order = Order::Reverse1;
        let graph = self.derivative_graph(atomic, order, args, 1);
        self.declare_temporaries(atomic, graph.start, args, 1);

        let tape = atomic.tape();
        let x = Self::independent_vector(atomic, &graph.indexed_indeps, args, 1);
        tape.evaluate(self.graph, &x)
            .map_err(Self::tape_error(atomic, order))?;

        let mut py = vec![Arg::Const(0.); tape.range()];
        py[row] = if self.variable_seeds {
            Arg::Node(graph.seeds[row])
        } else {
            Arg::Const(1.)
        };
        let px = tape
            .reverse(self.graph, 1, &x, &py)
            .map_err(Self::tape_error(atomic, order))?;

        log::debug!(
            "loop {}: materializing tape output {row} for {order:?}",
            atomic.loop_id().loop_id()
        );
        self.append_results(atomic, order, &graph, &px, jac.get(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Contribution, LoopPosition, Positions};
    use adcg::{Binop, Direction, IndexPattern, Tape};
    use adcg_tape::build;
    use enumset::EnumSet;
    use std::rc::Rc;

    const N: usize = 4;

    /// `y = a * b` with `a = x[j]`, `b = x[N + j]` and `y[j]`.
    fn product(loop_id: id::Loop) -> LoopAtomic {
        let mut f = build::Function::new(2);
        let a = f.input(0);
        let b = f.input(1);
        let c = f.binary(Binop::Mul, a, b);
        f.output(c);
        let tape: Rc<dyn Tape> = Rc::new(f.check().unwrap());
        let column = |offset: usize| -> Vec<LoopPosition> {
            (0..N)
                .map(|j| LoopPosition::new(offset + j, offset + j))
                .collect()
        };
        let positions = Positions {
            indexed: vec![column(0), column(N)],
            dependents: vec![column(0)],
            ..Default::default()
        };
        LoopAtomic::new(loop_id, N, tape, positions).unwrap()
    }

    fn jacobian() -> LoopJacobian {
        let mut jac = LoopJacobian::new();
        for (col, offset) in [(0, 0), (1, N)] {
            let contrib = Contribution {
                arg: Arg::Const(1.),
                pattern: IndexPattern::linear(1, offset as i64),
            };
            jac.insert(0, col, offset, contrib);
        }
        jac
    }

    fn setup() -> (Graph, Registry, id::Loop) {
        let loop_id = id::loop_id(0);
        let mut registry = Registry::new();
        registry.register(product(loop_id));
        (Graph::new(), registry, loop_id)
    }

    /// One call of the loop with `args`, returning its `N` results.
    fn call(
        g: &mut Graph,
        loop_id: id::Loop,
        direction: Direction,
        order: usize,
        args: Vec<Arg>,
    ) -> Vec<Arg> {
        let call = g.insert(
            Op::LoopCall {
                loop_id,
                direction,
                order,
            },
            args,
        );
        (0..N)
            .map(|output| Arg::Node(g.insert(Op::LoopResult { output }, vec![Arg::Node(call)])))
            .collect()
    }

    fn values(g: &mut Graph) -> Vec<Arg> {
        (0..2 * N).map(|i| g.independent(i)).collect()
    }

    /// Interleaved arguments seeding only the columns in `seeded`.
    fn seeded(g: &mut Graph, seeded: &[usize]) -> Vec<Arg> {
        let mut args = vec![];
        for (i, x) in values(g).into_iter().enumerate() {
            args.push(x);
            let seed = if seeded.contains(&(i / N)) { 1. } else { 0. };
            args.push(Arg::Const(seed));
        }
        args
    }

    fn count(g: &Graph, pred: impl Fn(Op) -> bool) -> usize {
        g.nodes().filter(|(_, node)| pred(node.op)).count()
    }

    fn output_end(g: &Graph, result: Arg) -> id::Node {
        let node = result.node().unwrap();
        assert!(matches!(g.op(node), Op::LoopOutput { .. }));
        g.args(node)[0].node().unwrap()
    }

    #[test]
    fn test_value_subgraph_is_shared() {
        let (mut g, mut registry, l) = setup();
        let mut deps = vec![];
        for _ in 0..3 {
            let x = values(&mut g);
            deps.extend(call(&mut g, l, Direction::Forward, 0, x));
        }
        LoopBuilder::new(&mut g, &mut registry)
            .prepare_loops(&deps, &Jacobians::new())
            .unwrap();

        let graph = registry.graph(l, Order::Forward0).unwrap().clone();
        for (i, &dep) in deps.iter().enumerate() {
            assert_eq!(output_end(&g, dep), graph.end);
            assert_eq!(g.op(dep.node().unwrap()), Op::LoopOutput { dependent: i });
        }
        assert_eq!(count(&g, |op| matches!(op, Op::LoopStart { .. })), 1);
        assert_eq!(count(&g, |op| matches!(op, Op::LoopEnd { .. })), 1);
        assert_eq!(registry.orders(l), EnumSet::only(Order::Forward0));

        assert_eq!(graph.indexed_indeps.len(), 2);
        assert_eq!(g.args(graph.indexed_indeps[1]).len(), N + 1);
        assert_eq!(g.args(graph.indexed_indeps[1])[0], Arg::Node(graph.start));
        let xn = g.independent(N);
        assert_eq!(g.args(graph.indexed_indeps[1])[1], xn);

        assert_eq!(g.args(graph.end), &[Arg::Node(graph.results[0])]);
        let Op::IndexedDep { pattern } = g.op(graph.results[0]) else {
            panic!("loop end must hold indexed results");
        };
        assert_eq!(g.pattern(pattern), &IndexPattern::linear(1, 0));
        let product = g.args(graph.results[0])[0].node().unwrap();
        assert_eq!(g.op(product), Op::Binary { op: Binop::Mul });
    }

    #[test]
    fn test_forward_columns_materialize_once() {
        let (mut g, mut registry, l) = setup();
        let mut jacobians = Jacobians::new();
        jacobians.insert(l, jacobian());

        let args = seeded(&mut g, &[0]);
        let first = call(&mut g, l, Direction::Forward, 1, args);
        LoopBuilder::new(&mut g, &mut registry)
            .prepare_loops(&first, &jacobians)
            .unwrap();
        let end = registry.graph(l, Order::Forward1).unwrap().end;
        assert_eq!(registry.materialized(l, Order::Forward1), vec![0]);
        assert_eq!(g.args(end).len(), 1);

        // the derivative of a * b along a is b
        let graph = registry.graph(l, Order::Forward1).unwrap().clone();
        assert_eq!(
            g.args(graph.results[0]),
            &[Arg::Node(graph.indexed_indeps[1])]
        );

        let args = seeded(&mut g, &[0]);
        let again = call(&mut g, l, Direction::Forward, 1, args);
        let args = seeded(&mut g, &[0, 1]);
        let both = call(&mut g, l, Direction::Forward, 1, args);
        let args = seeded(&mut g, &[1]);
        let last = call(&mut g, l, Direction::Forward, 1, args);
        let deps: Vec<Arg> = [again, both, last].concat();
        LoopBuilder::new(&mut g, &mut registry)
            .prepare_loops(&deps, &jacobians)
            .unwrap();

        assert_eq!(registry.materialized(l, Order::Forward1), vec![0, 1]);
        assert_eq!(g.args(end).len(), 2);
        assert_eq!(registry.graph(l, Order::Forward1).unwrap().results.len(), 2);
        for &dep in first.iter().chain(&deps) {
            assert_eq!(output_end(&g, dep), end);
        }
        assert_eq!(count(&g, |op| matches!(op, Op::LoopEnd { .. })), 1);
    }

    #[test]
    fn test_dead_columns_are_skipped() {
        let (mut g, mut registry, l) = setup();
        let mut jacobians = Jacobians::new();
        jacobians.insert(l, jacobian());

        let args = seeded(&mut g, &[]);
        let deps = call(&mut g, l, Direction::Forward, 1, args);
        LoopBuilder::new(&mut g, &mut registry)
            .prepare_loops(&deps, &jacobians)
            .unwrap();

        let graph = registry.graph(l, Order::Forward1).unwrap();
        assert!(registry.materialized(l, Order::Forward1).is_empty());
        assert!(g.args(graph.end).is_empty());
        assert_eq!(output_end(&g, deps[0]), graph.end);
    }

    #[test]
    fn test_variable_seeds() {
        let (mut g, mut registry, l) = setup();
        let mut jacobians = Jacobians::new();
        jacobians.insert(l, jacobian());

        let args = seeded(&mut g, &[1]);
        let deps = call(&mut g, l, Direction::Forward, 1, args);
        LoopBuilder::new(&mut g, &mut registry)
            .variable_seeds(true)
            .prepare_loops(&deps, &jacobians)
            .unwrap();

        let graph = registry.graph(l, Order::Forward1).unwrap();
        assert_eq!(graph.seeds.len(), 2);
        let deriv = g.args(graph.results[0])[0].node().unwrap();
        assert_eq!(g.op(deriv), Op::Binary { op: Binop::Mul });
        assert!(g.args(deriv).contains(&Arg::Node(graph.seeds[1])));
        assert_eq!(registry.materialized(l, Order::Forward1), vec![1]);
    }

    #[test]
    fn test_reverse_rows() {
        let (mut g, mut registry, l) = setup();
        let mut jacobians = Jacobians::new();
        jacobians.insert(l, jacobian());

        let mut args = values(&mut g);
        args.extend((0..N).map(|j| Arg::Const(if j == 2 { 1. } else { 0. })));
        let deps = call(&mut g, l, Direction::Reverse, 1, args);
        LoopBuilder::new(&mut g, &mut registry)
            .prepare_loops(&deps, &jacobians)
            .unwrap();

        let graph = registry.graph(l, Order::Reverse1).unwrap().clone();
        assert_eq!(registry.materialized(l, Order::Reverse1), vec![0]);
        assert_eq!(graph.seeds.len(), 1);
        // one result per tape input: b along a, then a along b
        assert_eq!(graph.results.len(), 2);
        assert_eq!(
            g.args(graph.results[0]),
            &[Arg::Node(graph.indexed_indeps[1])]
        );
        assert_eq!(
            g.args(graph.results[1]),
            &[Arg::Node(graph.indexed_indeps[0])]
        );
        let Op::IndexedDep { pattern } = g.op(graph.results[1]) else {
            panic!("loop end must hold indexed results");
        };
        assert_eq!(g.pattern(pattern), &IndexPattern::linear(1, N as i64));
        assert_eq!(registry.orders(l), EnumSet::only(Order::Reverse1));
    }

    #[test]
    fn test_temporaries_are_declared_once() {
        let loop_id = id::loop_id(3);
        let mut f = build::Function::new(2);
        let a = f.input(0);
        let t = f.input(1);
        let c = f.binary(Binop::Add, a, t);
        f.output(c);
        let positions = Positions {
            indexed: vec![(0..N).map(|j| LoopPosition::new(j, j)).collect()],
            temporaries: vec![LoopPosition::new(N, 0)],
            dependents: vec![(0..N).map(|j| LoopPosition::new(j, j)).collect()],
            ..Default::default()
        };
        let atomic = LoopAtomic::new(loop_id, N, Rc::new(f.check().unwrap()), positions).unwrap();
        let mut registry = Registry::new();
        registry.register(atomic);

        let mut g = Graph::new();
        let x0 = g.independent(0);
        let x1 = g.independent(1);
        let temp = g.mul(x0, x1);
        let mut deps = vec![];
        for _ in 0..2 {
            let mut args: Vec<Arg> = (0..N).map(|i| g.independent(i)).collect();
            args.push(temp);
            deps.extend(call(&mut g, loop_id, Direction::Forward, 0, args));
        }
        LoopBuilder::new(&mut g, &mut registry)
            .prepare_loops(&deps, &Jacobians::new())
            .unwrap();

        let start = registry.graph(loop_id, Order::Forward0).unwrap().start;
        assert_eq!(g.args(start), &[temp]);
    }

    #[test]
    fn test_contribution_temporaries_are_declared_once() {
        let (mut g, mut registry, l) = setup();
        let x0 = g.independent(0);
        let x1 = g.independent(1);
        let shared = g.mul(x0, x1);
        let only_b = g.neg(x1);
        let mut jac = LoopJacobian::new();
        for (col, original, arg) in [(0, 0, shared), (1, N, shared), (1, N + 1, only_b)] {
            let contrib = Contribution {
                arg,
                pattern: IndexPattern::linear(1, original as i64),
            };
            jac.insert(0, col, original, contrib);
        }
        let mut jacobians = Jacobians::new();
        jacobians.insert(l, jac);

        let mut deps = vec![];
        for _ in 0..2 {
            let args = seeded(&mut g, &[0, 1]);
            deps.extend(call(&mut g, l, Direction::Forward, 1, args));
        }
        let mut args = values(&mut g);
        args.extend(vec![Arg::Const(1.); N]);
        deps.extend(call(&mut g, l, Direction::Reverse, 1, args));
        LoopBuilder::new(&mut g, &mut registry)
            .prepare_loops(&deps, &jacobians)
            .unwrap();

        for order in [Order::Forward1, Order::Reverse1] {
            let start = registry.graph(l, order).unwrap().start;
            assert_eq!(g.args(start), &[shared, only_b], "{order:?}");
        }
    }

    #[test]
    fn test_reverse_rows_materialize_once() {
        let (mut g, mut registry, l) = setup();
        let mut jacobians = Jacobians::new();
        jacobians.insert(l, jacobian());

        let mut deps = vec![];
        for seed in 0..3 {
            let mut args = values(&mut g);
            args.extend((0..N).map(|j| Arg::Const(if j == seed { 1. } else { 0. })));
            deps.extend(call(&mut g, l, Direction::Reverse, 1, args));
        }
        let mut builder = LoopBuilder::new(&mut g, &mut registry);
        builder.prepare_loops(&deps[..N], &jacobians).unwrap();
        builder.prepare_loops(&deps[N..], &jacobians).unwrap();

        let graph = registry.graph(l, Order::Reverse1).unwrap();
        assert_eq!(registry.materialized(l, Order::Reverse1), vec![0]);
        assert_eq!(g.args(graph.end).len(), 2);
        assert_eq!(graph.results.len(), 2);
        for &dep in &deps {
            assert_eq!(output_end(&g, dep), graph.end);
        }
        assert_eq!(count(&g, |op| matches!(op, Op::LoopEnd { .. })), 1);
    }

    #[test]
    fn test_reregistration_discards_subgraphs() {
        let (mut g, mut registry, l) = setup();
        let x = values(&mut g);
        let deps = call(&mut g, l, Direction::Forward, 0, x);
        LoopBuilder::new(&mut g, &mut registry)
            .prepare_loops(&deps, &Jacobians::new())
            .unwrap();
        let old = registry.graph(l, Order::Forward0).unwrap().end;
        registry.mark_materialized(l, Order::Forward1, 0);

        registry.register(product(l));
        assert!(registry.orders(l).is_empty());
        assert!(!registry.is_materialized(l, Order::Forward1, 0));
        assert_eq!(registry.len(), 1);

        let x = values(&mut g);
        let deps = call(&mut g, l, Direction::Forward, 0, x);
        LoopBuilder::new(&mut g, &mut registry)
            .prepare_loops(&deps, &Jacobians::new())
            .unwrap();
        let new = registry.graph(l, Order::Forward0).unwrap().end;
        assert_ne!(old, new);
        assert_eq!(output_end(&g, deps[0]), new);
    }

    #[test]
    fn test_errors() {
        let (mut g, mut registry, l) = setup();

        let bad = g.insert(Op::LoopResult { output: 0 }, vec![Arg::Const(1.)]);
        let err = LoopBuilder::new(&mut g, &mut registry)
            .prepare_loops(&[Arg::Node(bad)], &Jacobians::new())
            .unwrap_err();
        assert!(matches!(err, Error::MalformedResult { node } if node == bad));

        let x = values(&mut g);
        let deps = call(&mut g, id::loop_id(9), Direction::Forward, 0, x);
        let err = LoopBuilder::new(&mut g, &mut registry)
            .prepare_loops(&deps, &Jacobians::new())
            .unwrap_err();
        assert!(matches!(err, Error::UnknownLoop { .. }));

        let deps = call(&mut g, l, Direction::Forward, 2, vec![]);
        let err = LoopBuilder::new(&mut g, &mut registry)
            .prepare_loops(&deps, &Jacobians::new())
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedOrder { order: 2, .. }));

        let deps = call(&mut g, l, Direction::Reverse, 0, vec![]);
        let err = LoopBuilder::new(&mut g, &mut registry)
            .prepare_loops(&deps, &Jacobians::new())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOrder { order: 0, .. }));

        let args = seeded(&mut g, &[0]);
        let deps = call(&mut g, l, Direction::Forward, 1, args);
        let err = LoopBuilder::new(&mut g, &mut registry)
            .prepare_loops(&deps, &Jacobians::new())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::MissingJacobian {
                order: Order::Forward1,
                ..
            }
        ));

        let deps = call(&mut g, l, Direction::Forward, 0, vec![Arg::Const(1.)]);
        let err = LoopBuilder::new(&mut g, &mut registry)
            .prepare_loops(&deps, &Jacobians::new())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ArgCount {
                expected: 8,
                found: 1,
                ..
            }
        ));
        assert!(registry.orders(l).is_empty());
    }

    #[test]
    fn test_arg_count_checked_after_value_subgraph_exists() {
        let (mut g, mut registry, l) = setup();
        let x = values(&mut g);
        let deps = call(&mut g, l, Direction::Forward, 0, x);
        LoopBuilder::new(&mut g, &mut registry)
            .prepare_loops(&deps, &Jacobians::new())
            .unwrap();

        let mut x = values(&mut g);
        x.pop();
        let short = call(&mut g, l, Direction::Forward, 0, x);
        let err = LoopBuilder::new(&mut g, &mut registry)
            .prepare_loops(&short, &Jacobians::new())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ArgCount {
                order: Order::Forward0,
                expected: 8,
                found: 7,
                ..
            }
        ));
        assert!(matches!(g.op(short[0].node().unwrap()), Op::LoopResult { .. }));
    }
}
