pub mod build;

use adcg::{Arg, Binop, Graph, Tape, Unop};

/// Index of an instruction in a [`Func`] body, naming the value it produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Var(usize);

pub const fn var(id: usize) -> Var {
    Var(id)
}

impl Var {
    pub fn var(self) -> usize {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Expr {
    Input { index: usize },
    Const { val: f64 },
    Unary { op: Unop, arg: Var },
    Binary { op: Binop, left: Var, right: Var },
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("instruction {0} uses a variable that is not defined before it")]
    Undefined(usize),

    #[error("instruction {0} reads input {1}, which is out of range")]
    InputRange(usize, usize),

    #[error("output {0} is not defined")]
    Output(usize),
}

/// A straight-line recorded function, replayed symbolically through [`Tape`].
///
/// Construct one with [`build::Function`], which checks that every variable is defined before
/// it is used.
#[derive(Clone, Debug)]
pub struct Func {
    inputs: usize,
    body: Vec<Expr>,
    outputs: Vec<Var>,
}

fn check_len(expected: usize, found: usize) -> Result<(), adcg::Error> {
    if expected == found {
        Ok(())
    } else {
        Err(adcg::Error::ArgCount { expected, found })
    }
}

impl Func {
    pub fn body(&self) -> &[Expr] {
        &self.body
    }

    pub fn outputs(&self) -> &[Var] {
        &self.outputs
    }

    /// Record the value of every instruction at the point `x`.
    fn values(&self, g: &mut Graph, x: &[Arg]) -> Vec<Arg> {
        let mut vals: Vec<Arg> = Vec::with_capacity(self.body.len());
        for expr in &self.body {
            let val = match *expr {
                Expr::Input { index } => x[index],
                Expr::Const { val } => Arg::Const(val),
                Expr::Unary { op, arg } => g.unary(op, vals[arg.var()]),
                Expr::Binary { op, left, right } => {
                    g.binary(op, vals[left.var()], vals[right.var()])
                }
            };
            vals.push(val);
        }
        vals
    }

    /// Tangent of one instruction, given the already recorded values and tangents.
    fn tangent(&self, g: &mut Graph, vals: &[Arg], tans: &[Arg], i: usize) -> Arg {
        match self.body[i] {
            Expr::Input { .. } => unreachable!("inputs carry their own tangent"),
            Expr::Const { .. } => Arg::Const(0.),
            Expr::Unary { op, arg } => {
                let x = vals[arg.var()];
                let dx = tans[arg.var()];
                if dx.is_zero() {
                    return Arg::Const(0.);
                }
                match op {
                    Unop::Neg => g.neg(dx),
                    Unop::Sqrt => {
                        let z = g.mul(Arg::Const(2.), vals[i]);
                        g.div(dx, z)
                    }
                    Unop::Exp => g.mul(dx, vals[i]),
                    Unop::Log => g.div(dx, x),
                    Unop::Sin => {
                        let c = g.unary(Unop::Cos, x);
                        g.mul(dx, c)
                    }
                    Unop::Cos => {
                        let s = g.unary(Unop::Sin, x);
                        let a = g.mul(dx, s);
                        g.neg(a)
                    }
                }
            }
            Expr::Binary { op, left, right } => {
                let (x, dx) = (vals[left.var()], tans[left.var()]);
                let (y, dy) = (vals[right.var()], tans[right.var()]);
                match op {
                    Binop::Add => g.add(dx, dy),
                    Binop::Sub => g.sub(dx, dy),
                    Binop::Mul => {
                        let a = g.mul(dx, y);
                        let b = g.mul(dy, x);
                        g.add(a, b)
                    }
                    Binop::Div => {
                        let a = g.div(dx, y);
                        if dy.is_zero() {
                            return a;
                        }
                        let b = g.div(vals[i], y);
                        let c = g.mul(dy, b);
                        g.sub(a, c)
                    }
                }
            }
        }
    }

    fn forward1(&self, g: &mut Graph, tx: &[Arg]) -> Vec<Arg> {
        let x: Vec<Arg> = tx.iter().step_by(2).copied().collect();
        let vals = self.values(g, &x);
        let mut tans = Vec::with_capacity(self.body.len());
        for (i, expr) in self.body.iter().enumerate() {
            let dz = match *expr {
                Expr::Input { index } => tx[2 * index + 1],
                _ => self.tangent(g, &vals, &tans, i),
            };
            tans.push(dz);
        }
        self.outputs
            .iter()
            .flat_map(|y| [vals[y.var()], tans[y.var()]])
            .collect()
    }

    fn reverse1(&self, g: &mut Graph, x: &[Arg], py: &[Arg]) -> Vec<Arg> {
        let vals = self.values(g, x);
        let mut adj = vec![Arg::Const(0.); self.body.len()];
        for (y, &w) in self.outputs.iter().zip(py) {
            adj[y.var()] = g.add(adj[y.var()], w);
        }
        let mut px = vec![Arg::Const(0.); self.inputs];
        for (i, expr) in self.body.iter().enumerate().rev() {
            let a = adj[i];
            if a.is_zero() {
                continue;
            }
            match *expr {
                Expr::Input { index } => px[index] = g.add(px[index], a),
                Expr::Const { .. } => {}
                Expr::Unary { op, arg } => {
                    let x = vals[arg.var()];
                    let d = match op {
                        Unop::Neg => g.neg(a),
                        Unop::Sqrt => {
                            let z = g.mul(Arg::Const(2.), vals[i]);
                            g.div(a, z)
                        }
                        Unop::Exp => g.mul(a, vals[i]),
                        Unop::Log => g.div(a, x),
                        Unop::Sin => {
                            let c = g.unary(Unop::Cos, x);
                            g.mul(a, c)
                        }
                        Unop::Cos => {
                            let s = g.unary(Unop::Sin, x);
                            let b = g.mul(a, s);
                            g.neg(b)
                        }
                    };
                    adj[arg.var()] = g.add(adj[arg.var()], d);
                }
                Expr::Binary { op, left, right } => {
                    let (l, r) = (left.var(), right.var());
                    let (dl, dr) = match op {
                        Binop::Add => (a, a),
                        Binop::Sub => (a, g.neg(a)),
                        Binop::Mul => (g.mul(a, vals[r]), g.mul(a, vals[l])),
                        Binop::Div => {
                            let dl = g.div(a, vals[r]);
                            let q = g.div(vals[i], vals[r]);
                            let b = g.mul(a, q);
                            (dl, g.neg(b))
                        }
                    };
                    adj[l] = g.add(adj[l], dl);
                    adj[r] = g.add(adj[r], dr);
                }
            }
        }
        px
    }
}

impl Tape for Func {
    fn domain(&self) -> usize {
        self.inputs
    }

    fn range(&self) -> usize {
        self.outputs.len()
    }

    fn forward(
        &self,
        graph: &mut Graph,
        order: usize,
        tx: &[Arg],
    ) -> Result<Vec<Arg>, adcg::Error> {
        match order {
            0 => {
                check_len(self.inputs, tx.len())?;
                let vals = self.values(graph, tx);
                Ok(self.outputs.iter().map(|y| vals[y.var()]).collect())
            }
            1 => {
                check_len(2 * self.inputs, tx.len())?;
                Ok(self.forward1(graph, tx))
            }
            _ => Err(adcg::Error::UnsupportedOrder { order }),
        }
    }

    fn reverse(
        &self,
        graph: &mut Graph,
        order: usize,
        x: &[Arg],
        py: &[Arg],
    ) -> Result<Vec<Arg>, adcg::Error> {
        if order != 1 {
            return Err(adcg::Error::UnsupportedOrder { order });
        }
        check_len(self.inputs, x.len())?;
        check_len(self.outputs.len(), py.len())?;
        Ok(self.reverse1(graph, x, py))
    }
}
