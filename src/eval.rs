//! 宿主求值器：内建函数

use std::rc::Rc;

use crate::common::{Result, TableError};
use crate::environment::Environment;
use crate::expr::{Builtin, Expr};
use crate::table::Table;
use crate::value::{Atom, Value};

fn type_error(func: Builtin, expected: &str, found: &Value) -> TableError {
    TableError::TypeMismatch {
        func:     func.name().into(),
        expected: expected.into(),
        found:    format!("{} {found}", found.type_name()),
    }
}

/// 数值：全为整数时按整数运算
#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn of(func: Builtin, v: &Value) -> Result<Self> {
        match v {
            Value::Atom(Atom::Integer(i)) => Ok(Self::Int(*i)),
            Value::Atom(Atom::Float(f))   => Ok(Self::Float(*f)),
            other => Err(type_error(func, "a number", other)),
        }
    }

    fn as_f64(self) -> f64 {
        match self { Self::Int(i) => i as f64, Self::Float(f) => f }
    }

    fn into_value(self) -> Value {
        match self { Self::Int(i) => Value::integer(i), Self::Float(f) => Value::float(f) }
    }
}

impl Environment {
    pub(crate) fn evaluate(&mut self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Const(v)   => Ok(v.clone()),
            Expr::Local(name) => self.locals.get(name)
                .cloned()
                .ok_or_else(|| TableError::UnboundVariable(format!("?{name}"))),
            Expr::Global(name) => self.globals.get(name)
                .cloned()
                .ok_or_else(|| TableError::UnboundVariable(format!("?*{name}*"))),
            Expr::RowRef { depth } => self.row_ref(*depth),
            Expr::ColumnRef { depth, column, ordinal } => self.column_ref(*depth, column, *ordinal),
            Expr::Query(q) => self.run_query(q),
            Expr::Call { func, args } => self.call(*func, args),
        }
    }

    fn evaluate_all(&mut self, args: &[Expr]) -> Result<Vec<Value>> {
        args.iter().map(|a| self.evaluate(a)).collect()
    }

    fn call(&mut self, func: Builtin, args: &[Expr]) -> Result<Value> {
        use Builtin::*;
        match func {
            Add | Sub | Mul | Div => {
                let values = self.evaluate_all(args)?;
                arithmetic(func, &values)
            }
            NumEq | NumNe | Gt | Ge | Lt | Le => {
                let values = self.evaluate_all(args)?;
                compare(func, &values).map(Value::boolean)
            }
            Eq | Neq => {
                let values = self.evaluate_all(args)?;
                let (first, rest) = values.split_first()
                    .ok_or_else(|| TableError::Arity { func: func.name().into(), expected: "at least 1".into(), found: 0 })?;
                let result = if func == Eq {
                    rest.iter().all(|v| v == first)
                } else {
                    rest.iter().all(|v| v != first)
                };
                Ok(Value::boolean(result))
            }
            And => {
                for a in args {
                    if !self.evaluate(a)?.is_true() { return Ok(Value::boolean(false)); }
                }
                Ok(Value::boolean(true))
            }
            Or => {
                for a in args {
                    if self.evaluate(a)?.is_true() { return Ok(Value::boolean(true)); }
                }
                Ok(Value::boolean(false))
            }
            Not => Ok(Value::boolean(!self.evaluate(&args[0])?.is_true())),
            Progn => self.sequence(args),
            If => self.if_then_else(args),
            Bind => self.bind(args),
            CreateMf => {
                let values = self.evaluate_all(args)?;
                Ok(Value::Multifield(values.into_iter().flat_map(Value::into_atoms).collect()))
            }
            LengthMf => match self.evaluate(&args[0])? {
                Value::Multifield(xs) => Ok(Value::integer(xs.len() as i64)),
                other => Err(type_error(func, "a multifield", &other)),
            },
            NthMf => {
                let index = self.evaluate(&args[0])?;
                let n = index.as_integer().ok_or_else(|| type_error(func, "an integer index", &index))?;
                match self.evaluate(&args[1])? {
                    Value::Multifield(xs) => usize::try_from(n).ok()
                        .and_then(|n| n.checked_sub(1))
                        .and_then(|i| xs.get(i).cloned())
                        .map(Value::Atom)
                        .ok_or_else(|| TableError::TypeMismatch {
                            func:     func.name().into(),
                            expected: format!("an index in 1..={}", xs.len()),
                            found:    n.to_string(),
                        }),
                    other => Err(type_error(func, "a multifield", &other)),
                }
            }
            StrCat | SymCat => {
                let mut s = String::new();
                for v in self.evaluate_all(args)? {
                    push_text(&mut s, &v);
                }
                Ok(if func == StrCat { Value::string(s) } else { Value::symbol(s) })
            }
            Printout => {
                // 路由名只求值不区分：全部写入输出缓冲
                self.evaluate(&args[0])?;
                for a in &args[1..] {
                    let v = self.evaluate(a)?;
                    match &v {
                        Value::Atom(Atom::Symbol(s)) if s == "crlf" => self.output.push('\n'),
                        _ => push_text(&mut self.output, &v),
                    }
                }
                Ok(Value::false_value())
            }
            Break => {
                self.queries.abort_innermost()?;
                Ok(Value::false_value())
            }
            Halt => {
                self.halted = true;
                Ok(Value::false_value())
            }
            Lookup => {
                let table = self.table_arg(func, &args[0])?;
                let row = self.evaluate(&args[1])?;
                let col = self.evaluate(&args[2])?;
                table.lookup(&row, &col).cloned()
            }
            ContainsKey => {
                let table = self.table_arg(func, &args[0])?;
                let key = self.evaluate(&args[1])?;
                Ok(Value::boolean(table.contains_key(&key)))
            }
            TableColumns => {
                let table = self.table_arg(func, &args[0])?;
                Ok(Value::Multifield(table.columns().to_vec()))
            }
            TableRowCount => {
                let table = self.table_arg(func, &args[0])?;
                Ok(Value::integer(table.row_count() as i64))
            }
            Undeftable => {
                let name = self.table_name_arg(func, &args[0])?;
                self.catalog.remove_table(&name)?;
                Ok(Value::boolean(true))
            }
        }
    }

    /// 依次求值，遇到 break / halt 即停；返回最后一个值
    fn sequence(&mut self, exprs: &[Expr]) -> Result<Value> {
        let mut last = Value::false_value();
        for e in exprs {
            last = self.evaluate(e)?;
            if self.interrupted() { break; }
        }
        Ok(last)
    }

    /// args = [cond, then, a..., (else, b...)?]
    fn if_then_else(&mut self, args: &[Expr]) -> Result<Value> {
        let body = &args[2..];
        let split = body.iter().position(|e| {
            matches!(e, Expr::Const(Value::Atom(Atom::Symbol(s))) if s == "else")
        });
        let (then_branch, else_branch) = match split {
            Some(i) => (&body[..i], &body[i + 1..]),
            None    => (body, &body[body.len()..]),
        };
        if self.evaluate(&args[0])?.is_true() {
            self.sequence(then_branch)
        } else {
            self.sequence(else_branch)
        }
    }

    fn bind(&mut self, args: &[Expr]) -> Result<Value> {
        let mut values = self.evaluate_all(&args[1..])?;
        let value = if values.len() == 1 {
            values.remove(0)
        } else {
            Value::Multifield(values.into_iter().flat_map(Value::into_atoms).collect())
        };
        match &args[0] {
            Expr::Local(name) => {
                self.locals.insert(name.clone(), value.clone());
            }
            Expr::Global(name) => {
                let slot = self.globals.get_mut(name)
                    .ok_or_else(|| TableError::UnboundVariable(format!("?*{name}*")))?;
                *slot = value.clone();
            }
            _ => return Err(TableError::InvalidExpression("bind: expected a variable".into())),
        }
        Ok(value)
    }

    fn table_name_arg(&mut self, func: Builtin, arg: &Expr) -> Result<String> {
        let v = self.evaluate(arg)?;
        v.as_atom()
            .and_then(Atom::lexeme)
            .map(str::to_string)
            .ok_or_else(|| type_error(func, "a table name", &v))
    }

    fn table_arg(&mut self, func: Builtin, arg: &Expr) -> Result<Rc<Table>> {
        let name = self.table_name_arg(func, arg)?;
        self.catalog.find_table(&name)
    }
}

/// 字符串不带引号输出，其余按显示形式
fn push_text(out: &mut String, v: &Value) {
    match v {
        Value::Atom(Atom::Str(s)) => out.push_str(s),
        other => out.push_str(&other.to_string()),
    }
}

fn arithmetic(func: Builtin, values: &[Value]) -> Result<Value> {
    let nums = values.iter().map(|v| Number::of(func, v)).collect::<Result<Vec<_>>>()?;
    let (&first, rest) = nums.split_first()
        .ok_or_else(|| TableError::Arity { func: func.name().into(), expected: "at least 1".into(), found: 0 })?;

    if func == Builtin::Div {
        let mut acc = first.as_f64();
        if rest.is_empty() {
            return if acc == 0.0 { Err(TableError::DivideByZero(func.name().into())) } else { Ok(Value::float(1.0 / acc)) };
        }
        for n in rest {
            let d = n.as_f64();
            if d == 0.0 {
                return Err(TableError::DivideByZero(func.name().into()));
            }
            acc /= d;
        }
        return Ok(Value::float(acc));
    }

    if func == Builtin::Sub && rest.is_empty() {
        return Ok(match first {
            Number::Int(i)   => Number::Int(i.wrapping_neg()),
            Number::Float(f) => Number::Float(-f),
        }.into_value());
    }

    let result = rest.iter().fold(first, |acc, &n| match (acc, n) {
        (Number::Int(a), Number::Int(b)) => Number::Int(match func {
            Builtin::Add => a.wrapping_add(b),
            Builtin::Sub => a.wrapping_sub(b),
            _            => a.wrapping_mul(b),
        }),
        (a, b) => {
            let (a, b) = (a.as_f64(), b.as_f64());
            Number::Float(match func {
                Builtin::Add => a + b,
                Builtin::Sub => a - b,
                _            => a * b,
            })
        }
    });
    Ok(result.into_value())
}

fn compare(func: Builtin, values: &[Value]) -> Result<bool> {
    let nums = values.iter()
        .map(|v| Number::of(func, v).map(Number::as_f64))
        .collect::<Result<Vec<f64>>>()?;
    let Some((first, rest)) = nums.split_first() else { return Ok(true) };
    Ok(match func {
        // <> ：第一个参数与其余所有参数都不相等
        Builtin::NumNe => rest.iter().all(|b| first != b),
        _ => nums.windows(2).all(|w| match func {
            Builtin::NumEq => w[0] == w[1],
            Builtin::Gt    => w[0] >  w[1],
            Builtin::Ge    => w[0] >= w[1],
            Builtin::Lt    => w[0] <  w[1],
            _              => w[0] <= w[1],
        }),
    })
}
