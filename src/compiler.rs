//! 表达式编译：`SExpr` → `Expr`
//!
//! 函数名在编译期解析为 `Builtin`；查询算子与行变量的改写见 `query::compiler`。

use std::rc::Rc;

use crate::catalog::Catalog;
use crate::common::{Result, TableError};
use crate::expr::{Builtin, Expr, QueryKind};
use crate::reader::SExpr;
use crate::table::Table;
use crate::value::Value;

/// 一个正在编译的查询引入的行变量绑定
#[derive(Debug, Clone)]
pub(crate) struct Binder {
    pub variable: String,
    /// 字面表名时编译期已知
    pub table:    Option<Rc<Table>>,
    pub kind:     QueryKind,
}

pub struct ExprCompiler<'c> {
    pub(crate) catalog: &'c Catalog,
    /// 词法嵌套的查询绑定，栈顶为最内层
    pub(crate) binders: Vec<Binder>,
}

impl<'c> ExprCompiler<'c> {
    pub fn new(catalog: &'c Catalog) -> Self {
        Self { catalog, binders: Vec::new() }
    }

    pub fn compile(&mut self, sx: &SExpr) -> Result<Expr> {
        match sx {
            SExpr::Atom(a)       => Ok(Expr::Const(Value::Atom(a.clone()))),
            SExpr::Global(g)     => Ok(Expr::Global(g.clone())),
            SExpr::Variable(v)   => Ok(self.resolve_variable(v)?.unwrap_or_else(|| Expr::Local(v.clone()))),
            SExpr::List(items) | SExpr::Eval(items) => self.compile_call(items),
        }
    }

    fn compile_call(&mut self, items: &[SExpr]) -> Result<Expr> {
        let Some((head, args)) = items.split_first() else {
            return Err(TableError::InvalidExpression("empty function call ()".into()));
        };
        let name = head.as_symbol()
            .ok_or_else(|| TableError::InvalidExpression(format!("function name expected, found {head}")))?;

        if let Some(kind) = QueryKind::from_name(name) {
            return self.compile_query(kind, args);
        }

        let func = Builtin::from_name(name)
            .ok_or_else(|| TableError::UnknownFunction(name.into()))?;
        check_arity(func, args.len())?;

        match func {
            Builtin::Bind => self.compile_bind(args),
            Builtin::If   => self.compile_if(args),
            _ => {
                let args = self.compile_all(args)?;
                Ok(Expr::call(func, args))
            }
        }
    }

    pub(crate) fn compile_all(&mut self, items: &[SExpr]) -> Result<Vec<Expr>> {
        items.iter().map(|x| self.compile(x)).collect()
    }

    /// `(bind ?x v...)` / `(bind ?*g* v...)`；绑定目标不做行变量改写
    fn compile_bind(&mut self, args: &[SExpr]) -> Result<Expr> {
        let target = match &args[0] {
            SExpr::Variable(v) => {
                self.check_rebind(v)?;
                Expr::Local(v.clone())
            }
            SExpr::Global(g) => Expr::Global(g.clone()),
            other => {
                return Err(TableError::InvalidExpression(format!("bind: expected a variable, found {other}")));
            }
        };
        let mut out = vec![target];
        out.extend(self.compile_all(&args[1..])?);
        Ok(Expr::call(Builtin::Bind, out))
    }

    /// `(if c then a... [else b...])`：`then` / `else` 保留为 symbol 常量
    fn compile_if(&mut self, args: &[SExpr]) -> Result<Expr> {
        if args.get(1).and_then(SExpr::as_symbol) != Some("then") {
            return Err(TableError::InvalidExpression("if: expected then after condition".into()));
        }
        let args = self.compile_all(args)?;
        Ok(Expr::call(Builtin::If, args))
    }
}

fn check_arity(func: Builtin, found: usize) -> Result<()> {
    let (min, max) = func.arity();
    if found < min || max.is_some_and(|m| found > m) {
        let expected = match max {
            Some(m) if m == min => format!("{min}"),
            Some(m)             => format!("{min}..{m}"),
            None                => format!("at least {min}"),
        };
        return Err(TableError::Arity { func: func.name().into(), expected, found });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::read_one;

    fn compile(src: &str) -> Result<Expr> {
        let catalog = Catalog::new();
        ExprCompiler::new(&catalog).compile(&read_one(src).unwrap())
    }

    #[test]
    fn resolves_builtins_and_variables() {
        let e = compile("(+ ?x 1)").unwrap();
        match e {
            Expr::Call { func: Builtin::Add, args } => {
                assert!(matches!(&args[0], Expr::Local(v) if v == "x"));
                assert!(matches!(&args[1], Expr::Const(_)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_functions_and_bad_arity() {
        assert_eq!(compile("(frobnicate 1)").unwrap_err(), TableError::UnknownFunction("frobnicate".into()));
        assert!(matches!(compile("(not 1 2)"), Err(TableError::Arity { .. })));
        assert!(matches!(compile("(if 1 2)"), Err(TableError::InvalidExpression(_))));
        assert!(matches!(compile("()"), Err(TableError::InvalidExpression(_))));
    }

    #[test]
    fn unrelated_colon_variable_stays_local_outside_queries() {
        assert!(matches!(compile("?a:b").unwrap(), Expr::Local(v) if v == "a:b"));
    }
}
