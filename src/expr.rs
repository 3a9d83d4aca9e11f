//! 编译后的宿主表达式

use std::rc::Rc;

use crate::common::ColumnOrdinal;
use crate::table::Table;
use crate::value::{Atom, Value};

/// 内建函数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Add, Sub, Mul, Div,
    NumEq, NumNe, Gt, Ge, Lt, Le,
    Eq, Neq,
    And, Or, Not,
    Progn, If, Bind,
    CreateMf, LengthMf, NthMf,
    StrCat, SymCat,
    Printout,
    Break, Halt,
    Lookup, ContainsKey, TableColumns, TableRowCount, Undeftable,
}

impl Builtin {
    pub fn from_name(name: &str) -> Option<Self> {
        use Builtin::*;
        Some(match name {
            "+" => Add, "-" => Sub, "*" => Mul, "/" => Div,
            "=" => NumEq, "<>" => NumNe,
            ">" => Gt, ">=" => Ge, "<" => Lt, "<=" => Le,
            "eq" => Eq, "neq" => Neq,
            "and" => And, "or" => Or, "not" => Not,
            "progn" => Progn, "if" => If, "bind" => Bind,
            "create$" => CreateMf, "length$" => LengthMf, "nth$" => NthMf,
            "str-cat" => StrCat, "sym-cat" => SymCat,
            "printout" => Printout,
            "break" => Break, "halt" => Halt,
            "lookup" => Lookup,
            "contains-key" => ContainsKey,
            "table-columns" => TableColumns,
            "table-row-count" => TableRowCount,
            "undeftable" => Undeftable,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        use Builtin::*;
        match self {
            Add => "+", Sub => "-", Mul => "*", Div => "/",
            NumEq => "=", NumNe => "<>",
            Gt => ">", Ge => ">=", Lt => "<", Le => "<=",
            Eq => "eq", Neq => "neq",
            And => "and", Or => "or", Not => "not",
            Progn => "progn", If => "if", Bind => "bind",
            CreateMf => "create$", LengthMf => "length$", NthMf => "nth$",
            StrCat => "str-cat", SymCat => "sym-cat",
            Printout => "printout",
            Break => "break", Halt => "halt",
            Lookup => "lookup",
            ContainsKey => "contains-key",
            TableColumns => "table-columns",
            TableRowCount => "table-row-count",
            Undeftable => "undeftable",
        }
    }

    /// (最少, 最多) 参数个数；None 表示不限
    pub fn arity(self) -> (usize, Option<usize>) {
        use Builtin::*;
        match self {
            Add | Mul | Sub | Div                     => (1, None),
            NumEq | NumNe | Gt | Ge | Lt | Le         => (1, None),
            Eq | Neq                                  => (1, None),
            And | Or                                  => (1, None),
            Not                                       => (1, Some(1)),
            Progn | CreateMf | StrCat | SymCat        => (0, None),
            If                                        => (1, None),
            Bind                                      => (2, None),
            LengthMf                                  => (1, Some(1)),
            NthMf                                     => (2, Some(2)),
            Printout                                  => (1, None),
            Break | Halt                              => (0, Some(0)),
            Lookup                                    => (3, Some(3)),
            ContainsKey                               => (2, Some(2)),
            TableColumns | TableRowCount | Undeftable => (1, Some(1)),
        }
    }
}

/// 五种查询算子
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Exists,
    FindRow,
    DoForRow,
    DoForAllRows,
    DoForThisRow,
}

impl QueryKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "row-exists?"     => Some(Self::Exists),
            "find-row"        => Some(Self::FindRow),
            "do-for-row"      => Some(Self::DoForRow),
            "do-for-all-rows" => Some(Self::DoForAllRows),
            "do-for-this-row" => Some(Self::DoForThisRow),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Exists       => "row-exists?",
            Self::FindRow      => "find-row",
            Self::DoForRow     => "do-for-row",
            Self::DoForAllRows => "do-for-all-rows",
            Self::DoForThisRow => "do-for-this-row",
        }
    }

    /// 是否带 action（两个只读算子没有）
    pub fn has_action(self) -> bool {
        !matches!(self, Self::Exists | Self::FindRow)
    }

    pub fn takes_key(self) -> bool {
        self == Self::DoForThisRow
    }
}

/// 查询的目标表
#[derive(Debug, Clone)]
pub enum TableRef {
    /// 编译期已解析的字面表名
    Static(Rc<Table>),
    /// 运行期求值后按名字解析
    Dynamic(Box<Expr>),
}

#[derive(Debug, Clone)]
pub struct QueryExpr {
    pub kind:     QueryKind,
    pub variable: String,
    pub table:    TableRef,
    pub key:      Option<Expr>,
    pub test:     Expr,
    pub action:   Option<Expr>,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Const(Value),
    Local(String),
    Global(String),
    Call { func: Builtin, args: Vec<Expr> },
    /// 行变量本身：`depth` 层外的帧的当前行键
    RowRef { depth: usize },
    /// `?v:column`：已知表时序号在编译期确定，否则运行期解析
    ColumnRef { depth: usize, column: Atom, ordinal: Option<ColumnOrdinal> },
    Query(Box<QueryExpr>),
}

impl Expr {
    pub fn call(func: Builtin, args: Vec<Expr>) -> Self {
        Self::Call { func, args }
    }
}
