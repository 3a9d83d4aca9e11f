//! 查询编译：行变量改写为带嵌套深度的访问器
//!
//! - `?v`        → `RowRef { depth }`
//! - `?v:column` → `ColumnRef { depth, column, ordinal }`
//!
//! depth 为引用点与其绑定查询之间相隔的查询算子层数（0 = 最内层）。
//! 只有查询算子会引入新的绑定层，普通函数调用不改变深度。
//! 表名为字面量时列名在编译期校验；动态表名推迟到运行期。

use crate::common::{Result, TableError};
use crate::compiler::{Binder, ExprCompiler};
use crate::expr::{Builtin, Expr, QueryExpr, QueryKind, TableRef};
use crate::reader::SExpr;
use crate::value::{Atom, Value};

impl<'c> ExprCompiler<'c> {
    /// `(op (?v table [key]) test action...)`
    pub(crate) fn compile_query(&mut self, kind: QueryKind, args: &[SExpr]) -> Result<Expr> {
        let op = kind.name();
        let Some((binding, body)) = args.split_first() else {
            return Err(TableError::InvalidExpression(format!("{op}: expected (?var table) binding")));
        };
        let binding_form = binding.as_list()
            .ok_or_else(|| TableError::InvalidExpression(format!("{op}: expected (?var table) binding, found {binding}")))?;

        let expected = if kind.takes_key() { 3 } else { 2 };
        if binding_form.len() != expected {
            let shape = if kind.takes_key() { "(?var table key)" } else { "(?var table)" };
            return Err(TableError::InvalidExpression(format!("{op}: expected {shape} binding, found {binding}")));
        }

        let variable = match &binding_form[0] {
            SExpr::Variable(v) if !v.contains(':') => v.clone(),
            other => {
                return Err(TableError::InvalidExpression(format!("{op}: expected a row variable, found {other}")));
            }
        };

        // 表与键表达式在新帧之外求值，只看得到外层绑定
        let table = self.compile_table_ref(kind, &binding_form[1])?;
        let key = if kind.takes_key() { Some(self.compile(&binding_form[2])?) } else { None };

        let found = body.len();
        if found == 0 || (!kind.has_action() && found != 1) {
            let expected = if kind.has_action() { "at least 2" } else { "2" };
            return Err(TableError::Arity { func: op.into(), expected: expected.into(), found: found + 1 });
        }

        let static_table = match &table {
            TableRef::Static(t) => Some(t.clone()),
            TableRef::Dynamic(_) => None,
        };
        self.binders.push(Binder { variable: variable.clone(), table: static_table, kind });
        let compiled = self.compile_query_body(kind, body);
        self.binders.pop();
        let (test, action) = compiled?;

        Ok(Expr::Query(Box::new(QueryExpr { kind, variable, table, key, test, action })))
    }

    fn compile_query_body(&mut self, kind: QueryKind, body: &[SExpr]) -> Result<(Expr, Option<Expr>)> {
        let test = self.compile(&body[0])?;
        let action = match &body[1..] {
            [] => None,
            [single] if kind.has_action() => Some(self.compile(single)?),
            many => Some(Expr::call(Builtin::Progn, self.compile_all(many)?)),
        };
        Ok((test, action))
    }

    fn compile_table_ref(&mut self, kind: QueryKind, sx: &SExpr) -> Result<TableRef> {
        let op = kind.name();
        match sx {
            SExpr::Atom(Atom::Symbol(name)) => match self.catalog.find_table(name) {
                Ok(t) => Ok(TableRef::Static(t)),
                Err(TableError::TableNotFound(_)) => {
                    Err(TableError::UnknownTable { op: op.into(), name: name.clone() })
                }
                Err(e) => Err(e),
            },
            SExpr::Atom(other) => Err(TableError::InvalidTableName { op: op.into(), found: other.to_string() }),
            _ => Ok(TableRef::Dynamic(Box::new(self.compile(sx)?))),
        }
    }

    /// 行变量与 `?v:col` 引用；与任何绑定都不匹配时返回 None（普通变量）
    pub(crate) fn resolve_variable(&self, name: &str) -> Result<Option<Expr>> {
        if let Some(depth) = self.binder_depth(name) {
            return Ok(Some(Expr::RowRef { depth }));
        }
        let Some((prefix, column)) = name.split_once(':') else { return Ok(None) };
        let Some(depth) = self.binder_depth(prefix) else { return Ok(None) };

        let binder = &self.binders[self.binders.len() - 1 - depth];
        let column_atom = Atom::symbol(column);
        let ordinal = match &binder.table {
            Some(t) => Some(t.column_ordinal(&Value::Atom(column_atom.clone())).ok_or_else(|| {
                TableError::UnknownColumn {
                    op:       binder.kind.name().into(),
                    variable: prefix.into(),
                    column:   column.into(),
                    table:    t.name().into(),
                }
            })?),
            None => None,
        };
        Ok(Some(Expr::ColumnRef { depth, column: column_atom, ordinal }))
    }

    fn binder_depth(&self, variable: &str) -> Option<usize> {
        self.binders.iter().rev().position(|b| b.variable == variable)
    }

    /// 拒绝对行变量（或其 `:column` 形式）的 bind
    pub(crate) fn check_rebind(&self, name: &str) -> Result<()> {
        let prefix = name.split_once(':').map_or(name, |(p, _)| p);
        match self.binders.iter().rev().find(|b| b.variable == prefix) {
            Some(b) => Err(TableError::RowVariableRebind { op: b.kind.name().into(), variable: name.into() }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::reader::read_one;
    use crate::table::{Table, TableParts};

    fn catalog() -> Catalog {
        let mut c = Catalog::new();
        for (name, cols) in [("x", ["id", "a"]), ("y", ["id", "b"])] {
            c.install(Table::build(TableParts {
                name:      name.into(),
                module:    "MAIN".into(),
                comment:   None,
                auto_keys: false,
                columns:   cols.iter().map(|c| Atom::symbol(*c)).collect(),
                cells:     vec![Value::integer(1), Value::integer(2)],
            }).unwrap()).unwrap();
        }
        c
    }

    fn compile(c: &Catalog, src: &str) -> Result<Expr> {
        ExprCompiler::new(c).compile(&read_one(src).unwrap())
    }

    fn query(e: &Expr) -> &QueryExpr {
        match e { Expr::Query(q) => q, other => panic!("not a query: {other:?}") }
    }

    #[test]
    fn row_and_column_refs_get_depth_zero() {
        let c = catalog();
        let e = compile(&c, "(do-for-row (?r x) (> ?r:a 1) ?r)").unwrap();
        let q = query(&e);
        assert!(matches!(&q.test, Expr::Call { args, .. }
            if matches!(&args[0], Expr::ColumnRef { depth: 0, ordinal: Some(1), .. })));
        assert!(matches!(q.action, Some(Expr::RowRef { depth: 0 })));
    }

    #[test]
    fn nested_query_counts_depth_per_reference_site() {
        let c = catalog();
        let e = compile(&c, "(do-for-all-rows (?x x) (> ?x:a 0) (find-row (?y y) (eq ?y:b ?x:a)))").unwrap();
        let outer = query(&e);
        assert!(matches!(&outer.test, Expr::Call { args, .. }
            if matches!(&args[0], Expr::ColumnRef { depth: 0, .. })));
        let inner = match &outer.action { Some(Expr::Query(q)) => q, other => panic!("{other:?}") };
        match &inner.test {
            Expr::Call { args, .. } => {
                assert!(matches!(&args[0], Expr::ColumnRef { depth: 0, ordinal: Some(1), .. }));
                assert!(matches!(&args[1], Expr::ColumnRef { depth: 1, ordinal: Some(1), .. }));
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn function_calls_do_not_change_depth() {
        let c = catalog();
        let e = compile(&c, "(row-exists? (?r x) (and (not (eq ?r 3)) (> (+ ?r:a 1) 0)))").unwrap();
        let q = query(&e);
        let Expr::Call { args, .. } = &q.test else { panic!() };
        let Expr::Call { args: not_args, .. } = &args[0] else { panic!() };
        let Expr::Call { args: eq_args, .. } = &not_args[0] else { panic!() };
        assert!(matches!(eq_args[0], Expr::RowRef { depth: 0 }));
    }

    #[test]
    fn unknown_column_is_rejected_for_static_tables() {
        let c = catalog();
        let err = compile(&c, "(find-row (?r x) (> ?r:zzz 1))").unwrap_err();
        assert_eq!(err, TableError::UnknownColumn {
            op: "find-row".into(), variable: "r".into(), column: "zzz".into(), table: "x".into(),
        });
    }

    #[test]
    fn dynamic_tables_defer_column_checks() {
        let c = catalog();
        let e = compile(&c, "(find-row (?r ?*t*) (> ?r:zzz 1))").unwrap();
        let q = query(&e);
        assert!(matches!(q.table, TableRef::Dynamic(_)));
        assert!(matches!(&q.test, Expr::Call { args, .. }
            if matches!(&args[0], Expr::ColumnRef { ordinal: None, .. })));
    }

    #[test]
    fn unrelated_prefix_is_left_alone() {
        let c = catalog();
        let e = compile(&c, "(find-row (?r x) (eq ?q:a 1))").unwrap();
        let q = query(&e);
        assert!(matches!(&q.test, Expr::Call { args, .. } if matches!(&args[0], Expr::Local(v) if v == "q:a")));
    }

    #[test]
    fn rebinding_the_row_variable_is_rejected() {
        let c = catalog();
        for src in [
            "(do-for-row (?r x) TRUE (bind ?r 1))",
            "(do-for-row (?r x) TRUE (bind ?r:a 1))",
            "(do-for-all-rows (?r x) TRUE (do-for-row (?s y) TRUE (bind ?r 2)))",
        ] {
            assert!(matches!(compile(&c, src), Err(TableError::RowVariableRebind { .. })), "{src}");
        }
        assert!(compile(&c, "(do-for-row (?r x) TRUE (bind ?other ?r))").is_ok());
    }

    #[test]
    fn table_names_are_checked_at_compile_time() {
        let c = catalog();
        assert_eq!(
            compile(&c, "(find-row (?r nope) TRUE)").unwrap_err(),
            TableError::UnknownTable { op: "find-row".into(), name: "nope".into() }
        );
        assert!(matches!(compile(&c, "(find-row (?r \"x\") TRUE)"), Err(TableError::InvalidTableName { .. })));
        assert!(matches!(compile(&c, "(find-row (?r 12) TRUE)"), Err(TableError::InvalidTableName { .. })));
    }

    #[test]
    fn operator_shapes_are_validated() {
        let c = catalog();
        assert!(compile(&c, "(do-for-this-row (?r x) TRUE ?r)").is_err());
        assert!(compile(&c, "(find-row (?r x 1) TRUE)").is_err());
        assert!(matches!(compile(&c, "(row-exists? (?r x) TRUE FALSE)"), Err(TableError::Arity { .. })));
        assert!(compile(&c, "(do-for-row (?r:a x) TRUE)").is_err());
        assert!(compile(&c, "(do-for-this-row (?r x 1) TRUE ?r:a ?r)").is_ok());
    }

    #[test]
    fn key_expression_is_compiled_outside_the_new_binding() {
        let c = catalog();
        let e = compile(&c, "(do-for-all-rows (?x x) TRUE (do-for-this-row (?y y ?x:a) TRUE ?y:b))").unwrap();
        let outer = query(&e);
        let Some(Expr::Query(inner)) = &outer.action else { panic!() };
        assert!(matches!(inner.key, Some(Expr::ColumnRef { depth: 0, .. })));
        assert!(matches!(inner.action, Some(Expr::ColumnRef { depth: 0, .. })));
    }
}
