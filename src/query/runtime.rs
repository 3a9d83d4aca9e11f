//! 查询运行期：帧栈与五个算子的共用驱动
//!
//! 驱动流程：解析表 → 压帧（同时固定表）→ 扫描或按键定位 → 弹帧。
//! 帧的 abort 标志在每行 test 之前清零，由 `break` 置位；扫描在每行之后
//! 检查 abort 与全局 halt，提前结束但不视为失败。

use std::rc::Rc;

use tracing::{debug, trace};

use crate::common::{ColumnOrdinal, Result, RowOrdinal, TableError};
use crate::environment::Environment;
use crate::expr::{QueryExpr, QueryKind, TableRef};
use crate::table::{Table, TablePin};
use crate::value::{Atom, Value};

// ── QueryFrame ────────────────────────────────────────────────────────────────

/// 一次查询算子调用的执行记录
#[derive(Debug)]
pub struct QueryFrame {
    kind:     QueryKind,
    variable: String,
    table:    TablePin,
    row:      RowOrdinal,
    abort:    bool,
}

impl QueryFrame {
    pub fn kind(&self)     -> QueryKind { self.kind }
    pub fn variable(&self) -> &str      { &self.variable }
    pub fn table(&self)    -> &Table    { &self.table }
    pub fn row(&self)      -> RowOrdinal { self.row }
    pub fn aborted(&self)  -> bool      { self.abort }
}

// ── QueryStack ────────────────────────────────────────────────────────────────

/// LIFO 帧栈；depth 0 为栈顶
#[derive(Debug, Default)]
pub struct QueryStack {
    frames: Vec<QueryFrame>,
}

impl QueryStack {
    pub fn len(&self)      -> usize { self.frames.len() }
    pub fn is_empty(&self) -> bool  { self.frames.is_empty() }

    fn push(&mut self, frame: QueryFrame) { self.frames.push(frame); }
    fn pop(&mut self) -> Option<QueryFrame> { self.frames.pop() }

    /// 从栈顶向下走 `depth` 层
    pub fn frame(&self, depth: usize) -> Result<&QueryFrame> {
        let active = self.frames.len();
        active.checked_sub(depth + 1)
            .and_then(|i| self.frames.get(i))
            .ok_or(TableError::FrameUnderflow { depth, active })
    }

    pub fn top(&self) -> Option<&QueryFrame> { self.frames.last() }

    fn top_mut(&mut self) -> Option<&mut QueryFrame> { self.frames.last_mut() }

    /// 置位栈顶帧的 abort 标志
    pub(crate) fn abort_innermost(&mut self) -> Result<()> {
        let frame = self.top_mut().ok_or(TableError::BreakOutsideQuery)?;
        frame.abort = true;
        Ok(())
    }

    fn visit(&mut self, row: RowOrdinal) {
        if let Some(f) = self.top_mut() {
            f.row   = row;
            f.abort = false;
        }
    }
}

// ── 驱动 ──────────────────────────────────────────────────────────────────────

impl Environment {
    pub(crate) fn run_query(&mut self, q: &QueryExpr) -> Result<Value> {
        let table = self.resolve_query_table(q)?;
        if self.queries.len() >= self.config.max_query_depth {
            return Err(TableError::QueryDepthExceeded(self.config.max_query_depth));
        }

        // 键在新帧之外求值；找不到行时 test 与 action 都不执行
        let start = match (&q.key, q.kind) {
            (Some(key), QueryKind::DoForThisRow) => {
                let key = self.evaluate(key)?;
                table.row_ordinal(&key).ok_or_else(|| TableError::NoRowForKey {
                    table: table.name().into(), key: key.to_string(),
                })?
            }
            (None, QueryKind::DoForThisRow) => {
                return Err(TableError::InvalidExpression("do-for-this-row: missing row key".into()));
            }
            _ => 0,
        };

        debug!(op = q.kind.name(), table = %table.qualified_name(), depth = self.queries.len(), "query start");
        self.queries.push(QueryFrame {
            kind:     q.kind,
            variable: q.variable.clone(),
            table:    table.pin(),
            row:      start,
            abort:    false,
        });
        let outcome = match q.kind {
            QueryKind::DoForThisRow => self.visit_keyed_row(q, start),
            _ => self.scan(q, table.row_count()),
        };
        self.queries.pop();
        outcome
    }

    fn resolve_query_table(&mut self, q: &QueryExpr) -> Result<Rc<Table>> {
        match &q.table {
            // 编译期绑定的表须仍在注册表中：同一表达式里先前的 undeftable 使其失效
            TableRef::Static(t) => {
                let qualified = t.qualified_name();
                match self.catalog.find_table(&qualified) {
                    Ok(current) if Rc::ptr_eq(&current, t) => Ok(current),
                    _ => Err(TableError::TableNotFound(qualified)),
                }
            }
            TableRef::Dynamic(expr) => {
                let v = self.evaluate(expr)?;
                let name = v.as_atom().and_then(Atom::lexeme).ok_or_else(|| {
                    TableError::InvalidTableName { op: q.kind.name().into(), found: v.to_string() }
                })?;
                self.catalog.find_table(name)
            }
        }
    }

    fn scan(&mut self, q: &QueryExpr, rows: usize) -> Result<Value> {
        let mut result = Value::false_value();
        for row in 0..rows as RowOrdinal {
            self.queries.visit(row);
            trace!(op = q.kind.name(), row, "test");
            let passed = self.evaluate(&q.test)?.is_true();

            if passed && !self.interrupted() {
                match q.kind {
                    QueryKind::Exists => return Ok(Value::boolean(true)),
                    QueryKind::FindRow => return self.current_row_key(),
                    QueryKind::DoForRow | QueryKind::DoForThisRow => return self.run_action(q),
                    QueryKind::DoForAllRows => result = self.run_action(q)?,
                }
            }
            if self.interrupted() {
                debug!(op = q.kind.name(), row, "scan interrupted");
                break;
            }
        }
        Ok(result)
    }

    fn visit_keyed_row(&mut self, q: &QueryExpr, row: RowOrdinal) -> Result<Value> {
        self.queries.visit(row);
        if self.evaluate(&q.test)?.is_true() && !self.interrupted() {
            return self.run_action(q);
        }
        Ok(Value::false_value())
    }

    fn run_action(&mut self, q: &QueryExpr) -> Result<Value> {
        match &q.action {
            Some(action) => self.evaluate(action),
            None => Ok(Value::false_value()),
        }
    }

    fn current_row_key(&self) -> Result<Value> {
        self.row_ref(0)
    }

    /// 全局 halt 或最内层帧 abort
    pub(crate) fn interrupted(&self) -> bool {
        self.halted || self.queries.top().is_some_and(QueryFrame::aborted)
    }

    /// `?v`：depth 层外帧当前行的行键
    pub(crate) fn row_ref(&self, depth: usize) -> Result<Value> {
        let frame = self.queries.frame(depth)?;
        frame.table.row_key(frame.row)
            .cloned()
            .ok_or(TableError::FrameUnderflow { depth, active: self.queries.len() })
    }

    /// `?v:column`：未在编译期确定序号时按列名查找
    pub(crate) fn column_ref(
        &self,
        depth:   usize,
        column:  &Atom,
        ordinal: Option<ColumnOrdinal>,
    ) -> Result<Value> {
        let frame = self.queries.frame(depth)?;
        let col = match ordinal {
            Some(o) => o,
            None => frame.table.column_ordinal(&Value::Atom(column.clone())).ok_or_else(|| {
                TableError::UnknownColumn {
                    op:       frame.kind.name().into(),
                    variable: frame.variable.clone(),
                    column:   column.to_string(),
                    table:    frame.table.name().into(),
                }
            })?,
        };
        frame.table.cell(frame.row, col)
            .cloned()
            .ok_or_else(|| TableError::NoColumnForKey {
                table: frame.table.name().into(), key: column.to_string(),
            })
    }
}
