//! # indexed-table
//!
//! 带行 / 列哈希索引的静态表，以及在表上迭代的嵌入式查询语言。
//!
//! ## 整体架构
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                       Environment                         │
//! │   load / build ──► reader ──► DeftableCompiler ──► Table  │
//! │   eval        ──► reader ──► ExprCompiler ──► Expr        │
//! │                                   │                       │
//! │                      query::compiler (?v / ?v:col → depth)│
//! │                                   │                       │
//! │   evaluate ◄──────────────────────┘                       │
//! │     ├─ builtins (arith / compare / lookup / printout ...) │
//! │     └─ query::runtime                                     │
//! │          QueryStack  [QueryFrame{table pin, row, abort}]  │
//! ├───────────────────────────────────────────────────────────┤
//! │   Catalog (MAIN + defmodule, import 解析)                 │
//! │     └─ Rc<Table>                                          │
//! │          ├─ cells  (row-major, cell(r,c) = r*cols + c)    │
//! │          ├─ column_index : HashIndex  列名 → 列序号        │
//! │          └─ row_index    : HashIndex  第 0 列 → 行序号     │
//! ├───────────────────────────────────────────────────────────┤
//! │   snapshot : MAGIC | header | LZ4 payload | CRC32         │
//! └───────────────────────────────────────────────────────────┘
//! ```

// ── 表与索引 ──────────────────────────────────────────────────────────────────
pub mod common;
pub mod value;
pub mod key;
pub mod index;
pub mod table;
pub mod catalog;

// ── 语言 ──────────────────────────────────────────────────────────────────────
pub mod reader;
pub mod expr;
pub mod compiler;
pub mod definition;
pub mod query;
pub mod eval;

// ── 环境 ──────────────────────────────────────────────────────────────────────
pub mod config;
pub mod environment;
pub mod snapshot;

pub use common::{Result, TableError};
pub use config::{EngineConfig, SnapshotCompression};
pub use environment::Environment;
pub use table::Table;
pub use value::{Atom, Value};
