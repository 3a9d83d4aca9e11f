//! Table 存储：列键列表 + 行优先单元格数组 + 行/列双哈希索引

use std::cell::Cell;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use tracing::trace;

use crate::common::{ColumnOrdinal, Result, RowOrdinal, TableError};
use crate::index::HashIndex;
use crate::value::{Atom, Value};

// ── TableParts ────────────────────────────────────────────────────────────────

/// 建表所需的原始数据（定义编译器或快照重载产出）
#[derive(Debug, Clone)]
pub struct TableParts {
    pub name:      String,
    pub module:    String,
    pub comment:   Option<String>,
    /// 第 0 列为合成的整数键列
    pub auto_keys: bool,
    pub columns:   Vec<Atom>,
    /// 行优先，len == row_count × columns.len()
    pub cells:     Vec<Value>,
}

// ── Table ─────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Table {
    name:         String,
    module:       String,
    comment:      Option<String>,
    auto_keys:    bool,
    columns:      Vec<Atom>,
    cells:        Vec<Value>,
    column_index: HashIndex,
    row_index:    HashIndex,
    busy:         Cell<u32>,
}

impl Table {
    /// 一次性建表：两套索引同时构建，遇到重复列键 / 行键即失败，
    /// 失败时已分配的部分随 `parts` 一起释放。
    pub fn build(parts: TableParts) -> Result<Self> {
        let column_buckets = crate::index::bucket_count_for(parts.columns.len());
        let row_count = if parts.columns.is_empty() { 0 } else { parts.cells.len() / parts.columns.len() };
        let row_buckets = crate::index::bucket_count_for(row_count);
        Self::build_with_buckets(parts, column_buckets, row_buckets)
    }

    /// 用给定桶数重建索引（快照重载路径）
    pub fn build_with_buckets(
        parts:          TableParts,
        column_buckets: usize,
        row_buckets:    usize,
    ) -> Result<Self> {
        let TableParts { name, module, comment, auto_keys, columns, cells } = parts;
        let ncols = columns.len();
        let rows  = if ncols == 0 { 0 } else { cells.len() / ncols };
        if rows * ncols != cells.len() {
            return Err(TableError::CellCount {
                table: name, rows, columns: ncols, cells: cells.len(),
            });
        }

        let mut column_index = HashIndex::with_bucket_count(column_buckets);
        for (i, col) in columns.iter().enumerate() {
            let probe = Value::Atom(col.clone());
            if column_index.insert_unique(&probe, i as u32, |o| &columns[o as usize]).is_err() {
                return Err(TableError::DuplicateColumn { table: name, column: col.to_string() });
            }
        }

        let mut row_index = HashIndex::with_bucket_count(row_buckets);
        for r in 0..rows {
            let key = &cells[r * ncols];
            if row_index.insert_unique(key, r as u32, |o| &cells[o as usize * ncols]).is_err() {
                return Err(TableError::DuplicateRowKey { table: name, key: key.to_string() });
            }
        }

        Ok(Self {
            name, module, comment, auto_keys, columns, cells,
            column_index, row_index,
            busy: Cell::new(0),
        })
    }

    pub fn name(&self)      -> &str            { &self.name }
    pub fn module(&self)    -> &str            { &self.module }
    pub fn comment(&self)   -> Option<&str>    { self.comment.as_deref() }
    pub fn auto_keys(&self) -> bool            { self.auto_keys }
    pub fn columns(&self)   -> &[Atom]         { &self.columns }
    pub fn cells(&self)     -> &[Value]        { &self.cells }

    pub fn qualified_name(&self) -> String {
        format!("{}::{}", self.module, self.name)
    }

    pub fn column_count(&self) -> usize { self.columns.len() }

    pub fn row_count(&self) -> usize {
        if self.columns.is_empty() { 0 } else { self.cells.len() / self.columns.len() }
    }

    pub fn column_bucket_count(&self) -> usize { self.column_index.bucket_count() }
    pub fn row_bucket_count(&self)    -> usize { self.row_index.bucket_count() }

    /// cell(r, c) = cells[r × column_count + c]
    pub fn cell(&self, row: RowOrdinal, col: ColumnOrdinal) -> Option<&Value> {
        let (row, col) = (row as usize, col as usize);
        if row >= self.row_count() || col >= self.column_count() {
            return None;
        }
        self.cells.get(row * self.column_count() + col)
    }

    pub fn row(&self, row: RowOrdinal) -> Option<&[Value]> {
        let n = self.column_count();
        let start = row as usize * n;
        self.cells.get(start..start + n).filter(|_| n > 0)
    }

    /// 第 0 列即行键
    pub fn row_key(&self, row: RowOrdinal) -> Option<&Value> {
        self.cell(row, 0)
    }

    pub fn column_ordinal(&self, key: &Value) -> Option<ColumnOrdinal> {
        let found = self.column_index.lookup(key, |o| &self.columns[o as usize]);
        trace!(table = %self.name, %key, ?found, "column lookup");
        found
    }

    pub fn row_ordinal(&self, key: &Value) -> Option<RowOrdinal> {
        let n = self.column_count();
        let found = self.row_index.lookup(key, |o| &self.cells[o as usize * n]);
        trace!(table = %self.name, %key, ?found, "row lookup");
        found
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.row_ordinal(key).is_some()
    }

    /// (row_key, column_key) → 单元格
    pub fn lookup(&self, row_key: &Value, column_key: &Value) -> Result<&Value> {
        let row = self.row_ordinal(row_key).ok_or_else(|| TableError::NoRowForKey {
            table: self.name.clone(), key: row_key.to_string(),
        })?;
        let col = self.column_ordinal(column_key).ok_or_else(|| TableError::NoColumnForKey {
            table: self.name.clone(), key: column_key.to_string(),
        })?;
        self.cell(row, col).ok_or_else(|| TableError::NoRowForKey {
            table: self.name.clone(), key: row_key.to_string(),
        })
    }

    pub fn busy_count(&self) -> u32 { self.busy.get() }

    /// 固定表直到返回的 pin 被丢弃；固定期间拒绝删除 / 重定义
    pub fn pin(self: &Rc<Self>) -> TablePin {
        self.busy.set(self.busy.get() + 1);
        TablePin { table: Rc::clone(self) }
    }
}

/// deftable 形式的 pretty print
impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(deftable {}", self.qualified_name())?;
        if let Some(c) = &self.comment {
            write!(f, " {}", Atom::string(c.as_str()))?;
        }
        // 自动键表不输出合成的键列
        let skip = usize::from(self.auto_keys);
        if self.auto_keys {
            write!(f, "\n   (declare (auto-keys TRUE))")?;
        }
        write!(f, "\n   (")?;
        for (i, c) in self.columns.iter().skip(skip).enumerate() {
            if i > 0 { write!(f, " ")?; }
            write!(f, "{c}")?;
        }
        write!(f, ")")?;
        for r in 0..self.row_count() {
            let Some(row) = self.row(r as RowOrdinal) else { break };
            write!(f, "\n   (")?;
            for (i, v) in row.iter().skip(skip).enumerate() {
                if i > 0 { write!(f, " ")?; }
                write!(f, "{v}")?;
            }
            write!(f, ")")?;
        }
        write!(f, ")")
    }
}

// ── TablePin ──────────────────────────────────────────────────────────────────

/// 表的忙计数守卫
#[derive(Debug)]
pub struct TablePin {
    table: Rc<Table>,
}

impl TablePin {
    pub fn table(&self) -> &Rc<Table> { &self.table }
}

impl Deref for TablePin {
    type Target = Table;
    fn deref(&self) -> &Table { &self.table }
}

impl Drop for TablePin {
    fn drop(&mut self) {
        let busy = self.table.busy.get();
        self.table.busy.set(busy.saturating_sub(1));
    }
}
