//! 全局基础类型与错误定义

use thiserror::Error;

// ── 序号类型别名 ──────────────────────────────────────────────────────────────

/// 行在表内的 0 基序号
pub type RowOrdinal    = u32;
/// 列在表内的 0 基序号
pub type ColumnOrdinal = u32;

/// 未指定模块时使用的默认模块
pub const MAIN_MODULE: &str = "MAIN";

// ── 错误 ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TableError {
    // ── 定义期错误 ──
    #[error("deftable {table}: duplicate column key {column}")]
    DuplicateColumn { table: String, column: String },
    #[error("deftable {table}: duplicate row key {key}")]
    DuplicateRowKey { table: String, key: String },
    #[error("deftable {table}: row {row} has {found} values, expected {expected}")]
    RowArity { table: String, row: usize, expected: usize, found: usize },
    #[error("deftable {table}: column name must be a symbol, found {found}")]
    InvalidColumnName { table: String, found: String },
    #[error("deftable {table}: malformed declare clause: {detail}")]
    MalformedDeclare { table: String, detail: String },
    #[error("deftable {table}: invalid cell value {found}")]
    InvalidCell { table: String, found: String },
    #[error("deftable {table}: cell count {cells} is not rows {rows} x columns {columns}")]
    CellCount { table: String, rows: usize, columns: usize, cells: usize },

    // ── 编译期错误 ──
    #[error("syntax error on line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("{op}: unable to find table {name}")]
    UnknownTable { op: String, name: String },
    #[error("{op}: table name must be a symbol, found {found}")]
    InvalidTableName { op: String, found: String },
    #[error("{op}: variable ?{variable} refers to column {column} which does not exist in table {table}")]
    UnknownColumn { op: String, variable: String, column: String, table: String },
    #[error("{op}: cannot rebind table member variable ?{variable}")]
    RowVariableRebind { op: String, variable: String },
    #[error("unknown function {0}")]
    UnknownFunction(String),
    #[error("{func}: expected {expected} arguments, found {found}")]
    Arity { func: String, expected: String, found: usize },
    #[error("invalid expression: {0}")]
    InvalidExpression(String),
    #[error("unknown construct {0}")]
    UnknownConstruct(String),
    #[error("unknown module {0}")]
    UnknownModule(String),

    // ── 运行期错误 ──
    #[error("table {0} not found")]
    TableNotFound(String),
    #[error("table name {name} is ambiguous among modules {modules:?}")]
    AmbiguousTable { name: String, modules: Vec<String> },
    #[error("table {table}: no row for key {key}")]
    NoRowForKey { table: String, key: String },
    #[error("table {table}: no column for key {key}")]
    NoColumnForKey { table: String, key: String },
    #[error("table {table} is in use by {busy} active queries")]
    TableInUse { table: String, busy: u32 },
    #[error("unbound variable {0}")]
    UnboundVariable(String),
    #[error("{func}: expected {expected}, found {found}")]
    TypeMismatch { func: String, expected: String, found: String },
    #[error("{0}: division by zero")]
    DivideByZero(String),
    #[error("query nesting exceeds {0} frames")]
    QueryDepthExceeded(usize),
    #[error("break used outside of a table query")]
    BreakOutsideQuery,

    // ── 持久化 ──
    #[error("snapshot error: {0}")]
    Snapshot(String),
    #[error("snapshot checksum mismatch")]
    ChecksumMismatch,
    #[error("compression error: {0}")]
    Compression(String),

    // ── 结构性损坏（致命）──
    #[error("query frame at depth {depth} does not exist ({active} frames active)")]
    FrameUnderflow { depth: usize, active: usize },
}

pub type Result<T> = std::result::Result<T, TableError>;
