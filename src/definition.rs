//! deftable 定义编译器
//!
//! ```text
//! (deftable <name> [<comment>]
//!    [(declare (auto-keys TRUE|FALSE))]
//!    (<column>+)
//!    (<value>*)*)
//! ```
//!
//! 状态机：Header → Columns → Rows* → Close。
//! 单元格值可以是原子、原子组成的复合值、`?*global*` 或 `=(call ...)`；
//! 后两者在定义期立即求值并冻结为常量，之后访问不会重新求值。
//! 任何错误都使整个定义作废，不会安装部分表。

use tracing::{trace, warn};

use crate::common::{Result, TableError};
use crate::reader::SExpr;
use crate::table::{Table, TableParts};
use crate::value::{Atom, Value};

/// 定义期求值服务（全局变量、`=(...)` 调用）
pub trait CellEvaluator {
    fn evaluate_cell(&mut self, sx: &SExpr) -> Result<Value>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Header,
    Columns,
    Rows,
    Close,
}

pub struct DeftableCompiler {
    /// 表名未带 `MOD::` 前缀时所属模块
    default_module:  String,
    auto_key_column: String,
}

impl DeftableCompiler {
    pub fn new(default_module: &str, auto_key_column: &str) -> Self {
        Self { default_module: default_module.into(), auto_key_column: auto_key_column.into() }
    }

    /// `form` 为完整的 `(deftable ...)` 列表项
    pub fn compile(&self, form: &[SExpr], eval: &mut dyn CellEvaluator) -> Result<Table> {
        let parts = self.parse(form, eval)?;
        let name = parts.name.clone();
        Table::build(parts).map_err(|e| {
            warn!(table = %name, error = %e, "deftable rejected");
            e
        })
    }

    fn parse(&self, form: &[SExpr], eval: &mut dyn CellEvaluator) -> Result<TableParts> {
        let mut stage = Stage::Header;
        let mut items = form.iter().skip(1).peekable();

        let mut name      = String::new();
        let mut module    = self.default_module.clone();
        let mut comment   = None;
        let mut auto_keys = false;
        let mut declared  = false;
        let mut columns: Vec<Atom>  = Vec::new();
        let mut cells:   Vec<Value> = Vec::new();
        let mut rows = 0usize;

        while stage != Stage::Close {
            match stage {
                Stage::Header => {
                    let raw = match items.next() {
                        Some(SExpr::Atom(Atom::Symbol(s))) => s.clone(),
                        Some(other) => {
                            return Err(TableError::InvalidTableName { op: "deftable".into(), found: other.to_string() });
                        }
                        None => {
                            return Err(TableError::InvalidExpression("deftable: missing table name".into()));
                        }
                    };
                    match raw.split_once("::") {
                        Some((m, n)) => { module = m.into(); name = n.into(); }
                        None => name = raw,
                    }
                    if let Some(SExpr::Atom(Atom::Str(c))) = items.peek() {
                        comment = Some(c.clone());
                        items.next();
                    }
                    stage = Stage::Columns;
                }

                Stage::Columns => {
                    let item = items.next().ok_or_else(|| {
                        TableError::InvalidExpression(format!("deftable {name}: missing column list"))
                    })?;
                    let list = item.as_list().ok_or_else(|| {
                        TableError::InvalidExpression(format!("deftable {name}: expected a column list, found {item}"))
                    })?;
                    if item.head() == Some("declare") {
                        if declared {
                            return Err(TableError::MalformedDeclare { table: name, detail: "declare given twice".into() });
                        }
                        auto_keys = parse_declare(&name, &list[1..])?;
                        declared = true;
                        continue;
                    }
                    if auto_keys {
                        columns.push(Atom::symbol(self.auto_key_column.as_str()));
                    }
                    for c in list {
                        match c {
                            SExpr::Atom(a @ Atom::Symbol(_)) => columns.push(a.clone()),
                            other => {
                                return Err(TableError::InvalidColumnName { table: name, found: other.to_string() });
                            }
                        }
                    }
                    if columns.is_empty() {
                        return Err(TableError::InvalidExpression(format!("deftable {name}: at least one column is required")));
                    }
                    stage = Stage::Rows;
                }

                Stage::Rows => {
                    let Some(item) = items.next() else {
                        stage = Stage::Close;
                        continue;
                    };
                    let values = item.as_list().ok_or_else(|| {
                        TableError::InvalidExpression(format!("deftable {name}: expected a row, found {item}"))
                    })?;
                    rows += 1;
                    let expected = columns.len() - usize::from(auto_keys);
                    if values.len() != expected {
                        return Err(TableError::RowArity { table: name, row: rows, expected, found: values.len() });
                    }
                    if auto_keys {
                        cells.push(Value::integer(rows as i64));
                    }
                    for v in values {
                        cells.push(cell_value(&name, v, eval)?);
                    }
                    trace!(table = %name, row = rows, "row parsed");
                }

                Stage::Close => {}
            }
        }

        Ok(TableParts { name, module, comment, auto_keys, columns, cells })
    }
}

/// `(declare (auto-keys TRUE|FALSE))` → auto_keys
fn parse_declare(table: &str, props: &[SExpr]) -> Result<bool> {
    let malformed = |detail: String| TableError::MalformedDeclare { table: table.into(), detail };
    if props.is_empty() {
        return Err(malformed("empty declare".into()));
    }
    let mut auto_keys = false;
    for p in props {
        let prop = p.as_list().ok_or_else(|| malformed(format!("expected (property value), found {p}")))?;
        match prop {
            [name, value] if name.as_symbol() == Some("auto-keys") => {
                auto_keys = match value.as_symbol() {
                    Some("TRUE")  => true,
                    Some("FALSE") => false,
                    _ => return Err(malformed(format!("auto-keys expects TRUE or FALSE, found {value}"))),
                };
            }
            [name, ..] if name.as_symbol() == Some("auto-keys") => {
                return Err(malformed("auto-keys expects exactly one value".into()));
            }
            _ => return Err(malformed(format!("unknown property {p}"))),
        }
    }
    Ok(auto_keys)
}

fn cell_value(table: &str, sx: &SExpr, eval: &mut dyn CellEvaluator) -> Result<Value> {
    match sx {
        SExpr::Atom(a) => Ok(Value::Atom(a.clone())),
        SExpr::List(_) => sx.to_literal().ok_or_else(|| TableError::InvalidCell {
            table: table.into(), found: sx.to_string(),
        }),
        SExpr::Global(_) | SExpr::Eval(_) => eval.evaluate_cell(sx),
        SExpr::Variable(_) => Err(TableError::InvalidCell { table: table.into(), found: sx.to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::read_one;

    /// 只认识 ?*n* = 5 与 =(seven)
    struct Fixed {
        calls: usize,
    }

    impl CellEvaluator for Fixed {
        fn evaluate_cell(&mut self, sx: &SExpr) -> Result<Value> {
            self.calls += 1;
            match sx {
                SExpr::Global(g) if g == "n" => Ok(Value::integer(5)),
                SExpr::Eval(xs) if xs.first().and_then(SExpr::as_symbol) == Some("seven") => Ok(Value::integer(7)),
                other => Err(TableError::UnboundVariable(other.to_string())),
            }
        }
    }

    fn compile(src: &str) -> Result<Table> {
        let form = read_one(src).unwrap();
        DeftableCompiler::new("MAIN", "key").compile(form.as_list().unwrap(), &mut Fixed { calls: 0 })
    }

    #[test]
    fn plain_table() {
        let t = compile(r#"(deftable accounts "people" (id name balance) (1 "Al" 10) (2 "Bo" 20))"#).unwrap();
        assert_eq!(t.name(), "accounts");
        assert_eq!(t.comment(), Some("people"));
        assert_eq!(t.row_count(), 2);
        assert_eq!(t.cell(1, 2), Some(&Value::integer(20)));
    }

    #[test]
    fn composite_cells_and_keys() {
        let t = compile("(deftable pairs (k v) ((a b) 1) ((b a) 2))").unwrap();
        let ba = Value::Multifield(vec![Atom::symbol("b"), Atom::symbol("a")]);
        assert_eq!(t.row_ordinal(&ba), Some(1));
        assert!(compile("(deftable bad (k v) ((a (b)) 1))").is_err());
    }

    #[test]
    fn dynamic_values_are_folded_once() {
        let form = read_one("(deftable t (k v) (1 ?*n*) (2 =(seven)))").unwrap();
        let mut eval = Fixed { calls: 0 };
        let t = DeftableCompiler::new("MAIN", "key").compile(form.as_list().unwrap(), &mut eval).unwrap();
        assert_eq!(eval.calls, 2);
        assert_eq!(t.cell(0, 1), Some(&Value::integer(5)));
        assert_eq!(t.cell(1, 1), Some(&Value::integer(7)));
        assert!(compile("(deftable t (k v) (1 ?x))").is_err());
    }

    #[test]
    fn auto_keys_prepend_a_synthetic_key_column() {
        let t = compile("(deftable colors (declare (auto-keys TRUE)) (name) (red) (green) (blue))").unwrap();
        assert!(t.auto_keys());
        assert_eq!(t.columns()[0], Atom::symbol("key"));
        assert_eq!(t.row_ordinal(&Value::integer(3)), Some(2));
        assert_eq!(t.cell(2, 1), Some(&Value::symbol("blue")));
    }

    #[test]
    fn row_arity_is_checked_against_column_count() {
        let err = compile("(deftable t (a b c) (1 2 3) (4 5))").unwrap_err();
        assert_eq!(err, TableError::RowArity { table: "t".into(), row: 2, expected: 3, found: 2 });
        assert!(matches!(compile("(deftable t (a b) (1 2 3))"), Err(TableError::RowArity { expected: 2, .. })));
        let err = compile("(deftable t (declare (auto-keys TRUE)) (a) (1 2))").unwrap_err();
        assert!(matches!(err, TableError::RowArity { expected: 1, found: 2, .. }));
    }

    #[test]
    fn definition_errors() {
        assert!(matches!(compile("(deftable t (a \"b\") (1 2))"), Err(TableError::InvalidColumnName { .. })));
        assert!(matches!(compile("(deftable t (a a) (1 2))"), Err(TableError::DuplicateColumn { .. })));
        assert!(matches!(compile("(deftable t (a) (1) (1))"), Err(TableError::DuplicateRowKey { .. })));
        assert!(matches!(compile("(deftable t (declare (auto-keys MAYBE)) (a))"), Err(TableError::MalformedDeclare { .. })));
        assert!(matches!(compile("(deftable t (declare (speed 3)) (a))"), Err(TableError::MalformedDeclare { .. })));
        assert!(matches!(compile("(deftable t (declare) (a))"), Err(TableError::MalformedDeclare { .. })));
        assert!(matches!(compile("(deftable 12 (a))"), Err(TableError::InvalidTableName { .. })));
        assert!(compile("(deftable t)").is_err());
        assert!(compile("(deftable t ())").is_err());
        assert!(compile("(deftable t (a) oops)").is_err());
    }

    #[test]
    fn qualified_name_sets_module() {
        let t = compile("(deftable OTHER::t (a) (1))").unwrap();
        assert_eq!(t.module(), "OTHER");
        assert_eq!(t.name(), "t");
    }

    #[test]
    fn auto_key_column_clashing_with_user_column_is_a_duplicate() {
        assert!(matches!(
            compile("(deftable t (declare (auto-keys TRUE)) (key v) (1 2))"),
            Err(TableError::DuplicateColumn { .. })
        ));
    }
}
