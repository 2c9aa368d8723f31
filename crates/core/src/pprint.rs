use crate::{Arg, Binop, Direction, Graph, IndexPattern, Linear, Op, Unop};
use std::fmt;

fn write_arg(f: &mut fmt::Formatter<'_>, arg: Arg) -> fmt::Result {
    match arg {
        Arg::Node(id) => write!(f, "n{}", id.node()),
        Arg::Const(val) => write!(f, "{val}"),
    }
}

fn write_args(f: &mut fmt::Formatter<'_>, args: &[Arg]) -> fmt::Result {
    write!(f, "(")?;
    let mut first = true;
    for &arg in args {
        if first {
            first = false;
        } else {
            write!(f, ", ")?;
        }
        write_arg(f, arg)?;
    }
    write!(f, ")")
}

fn write_line(f: &mut fmt::Formatter<'_>, line: Linear) -> fmt::Result {
    write!(f, "{}*i{:+}", line.slope, line.constant)
}

impl fmt::Display for IndexPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            &IndexPattern::Linear(line) => write_line(f, line),
            &IndexPattern::Sections(sections) => {
                write!(f, "i<{} ? ", sections.split())?;
                write_line(f, sections.first())?;
                write!(f, " : ")?;
                write_line(f, sections.second())
            }
            IndexPattern::Random { offsets } => write!(f, "random{offsets:?}"),
        }
    }
}

/// Debug listing of every node, one per line.
impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (id, node) in self.nodes() {
            write!(f, "n{} = ", id.node())?;
            match node.op {
                Op::Inv { index } => write!(f, "inv {index}")?,
                Op::Unary { op } => {
                    let name = match op {
                        Unop::Neg => "neg",
                        Unop::Sqrt => "sqrt",
                        Unop::Exp => "exp",
                        Unop::Log => "log",
                        Unop::Sin => "sin",
                        Unop::Cos => "cos",
                    };
                    write!(f, "{name}")?;
                    write_args(f, &node.args)?;
                }
                Op::Binary { op } => {
                    let sym = match op {
                        Binop::Add => "+",
                        Binop::Sub => "-",
                        Binop::Mul => "*",
                        Binop::Div => "/",
                    };
                    write_arg(f, node.args[0])?;
                    write!(f, " {sym} ")?;
                    write_arg(f, node.args[1])?;
                }
                Op::Array => {
                    write!(f, "array")?;
                    write_args(f, &node.args)?;
                }
                Op::LoopCall {
                    loop_id,
                    direction,
                    order,
                } => {
                    let dir = match direction {
                        Direction::Forward => "forward",
                        Direction::Reverse => "reverse",
                    };
                    write!(f, "loop{} {dir}{order}", loop_id.loop_id())?;
                    write_args(f, &node.args)?;
                }
                Op::LoopResult { output } => {
                    write!(f, "result {output} of ")?;
                    write_args(f, &node.args)?;
                }
                Op::LoopOutput { dependent } => {
                    write!(f, "output y{dependent} of ")?;
                    write_args(f, &node.args)?;
                }
                Op::LoopStart {
                    loop_id,
                    iterations,
                } => {
                    write!(f, "start loop{} x{iterations}", loop_id.loop_id())?;
                    write_args(f, &node.args)?;
                }
                Op::LoopEnd {
                    loop_id,
                    iterations,
                } => {
                    write!(f, "end loop{} x{iterations}", loop_id.loop_id())?;
                    write_args(f, &node.args)?;
                }
                Op::IndexedIndep { column, pattern } => {
                    write!(f, "indexed x{column} [{}]", self.pattern(pattern))?;
                    write_args(f, &node.args)?;
                }
                Op::LoopSeed { index } => write!(f, "seed {index}")?,
                Op::IndexedDep { pattern } => {
                    write!(f, "indexed y [{}]", self.pattern(pattern))?;
                    write_args(f, &node.args)?;
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
