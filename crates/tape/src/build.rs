use crate::{Error, Expr, Func, Var};
use adcg::{Binop, Unop};

/// A function under construction. Not guaranteed to be well-formed.
#[derive(Debug, Default)]
pub struct Function {
    pub inputs: usize,
    pub body: Vec<Expr>,
    pub outputs: Vec<Var>,
}

impl Function {
    pub fn new(inputs: usize) -> Self {
        Self {
            inputs,
            body: vec![],
            outputs: vec![],
        }
    }

    fn push(&mut self, expr: Expr) -> Var {
        let var = crate::var(self.body.len());
        self.body.push(expr);
        var
    }

    pub fn input(&mut self, index: usize) -> Var {
        self.push(Expr::Input { index })
    }

    pub fn constant(&mut self, val: f64) -> Var {
        self.push(Expr::Const { val })
    }

    pub fn unary(&mut self, op: Unop, arg: Var) -> Var {
        self.push(Expr::Unary { op, arg })
    }

    pub fn binary(&mut self, op: Binop, left: Var, right: Var) -> Var {
        self.push(Expr::Binary { op, left, right })
    }

    pub fn output(&mut self, var: Var) {
        self.outputs.push(var);
    }

    pub fn check(self) -> Result<Func, Error> {
        let Function {
            inputs,
            body,
            outputs,
        } = self;
        let defined = |i: usize, var: Var| {
            if var.var() < i {
                Ok(())
            } else {
                Err(Error::Undefined(i))
            }
        };
        for (i, expr) in body.iter().enumerate() {
            match *expr {
                Expr::Input { index } => {
                    if index >= inputs {
                        return Err(Error::InputRange(i, index));
                    }
                }
                Expr::Const { .. } => {}
                Expr::Unary { arg, .. } => defined(i, arg)?,
                Expr::Binary { left, right, .. } => {
                    defined(i, left)?;
                    defined(i, right)?;
                }
            }
        }
        for (k, var) in outputs.iter().enumerate() {
            if var.var() >= body.len() {
                return Err(Error::Output(k));
            }
        }
        Ok(Func {
            inputs,
            body,
            outputs,
        })
    }
}
