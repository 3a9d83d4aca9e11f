//! 顶层环境：构造加载、表达式求值、对外的表函数

use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::catalog::Catalog;
use crate::common::{Result, TableError};
use crate::compiler::ExprCompiler;
use crate::config::EngineConfig;
use crate::definition::{CellEvaluator, DeftableCompiler};
use crate::query::QueryStack;
use crate::reader::{read_all, read_one, SExpr};
use crate::table::Table;
use crate::value::{Atom, Value};

/// 单线程执行环境
///
/// 持有表注册表、全局变量与查询帧栈。查询帧只借用（并固定）表，
/// 表本身由 `Catalog` 以 `Rc` 持有。
#[derive(Debug)]
pub struct Environment {
    pub(crate) config:  EngineConfig,
    pub(crate) catalog: Catalog,
    pub(crate) globals: HashMap<String, Value>,
    /// 当前顶层求值的局部变量（bind ?x）
    pub(crate) locals:  HashMap<String, Value>,
    pub(crate) queries: QueryStack,
    pub(crate) output:  String,
    pub(crate) halted:  bool,
    evaluation_error:   bool,
}

impl Environment {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            config,
            catalog:          Catalog::new(),
            globals:          HashMap::new(),
            locals:           HashMap::new(),
            queries:          QueryStack::default(),
            output:           String::new(),
            halted:           false,
            evaluation_error: false,
        }
    }

    pub fn config(&self)  -> &EngineConfig { &self.config }
    pub fn catalog(&self) -> &Catalog      { &self.catalog }

    // ── 构造 ──────────────────────────────────────────────────────────────────

    /// 依次加载源码中的所有构造，返回加载数；遇到第一个错误即停止
    pub fn load(&mut self, src: &str) -> Result<usize> {
        let forms = read_all(src)?;
        for form in &forms {
            self.build_form(form)?;
        }
        Ok(forms.len())
    }

    /// 加载恰好一个构造
    pub fn build(&mut self, src: &str) -> Result<()> {
        let form = read_one(src)?;
        self.build_form(&form)
    }

    fn build_form(&mut self, form: &SExpr) -> Result<()> {
        self.begin_evaluation();
        let items = form.as_list()
            .ok_or_else(|| TableError::UnknownConstruct(form.to_string()))?;
        let result = match form.head() {
            Some("deftable")  => self.build_deftable(items),
            Some("defglobal") => self.build_defglobal(items),
            Some("defmodule") => self.build_defmodule(items),
            Some(other)       => Err(TableError::UnknownConstruct(other.into())),
            None              => Err(TableError::UnknownConstruct(form.to_string())),
        };
        if let Err(e) = &result {
            warn!(error = %e, "construct rejected");
        }
        result
    }

    fn build_deftable(&mut self, items: &[SExpr]) -> Result<()> {
        let compiler = DeftableCompiler::new(self.catalog.current_module(), &self.config.auto_key_column);
        let table = compiler.compile(items, self)?;
        self.catalog.install(table)?;
        Ok(())
    }

    /// `(defglobal [MODULE] ?*x* = expr ...)`
    fn build_defglobal(&mut self, items: &[SExpr]) -> Result<()> {
        let mut rest = &items[1..];
        if let Some(SExpr::Atom(Atom::Symbol(_))) = rest.first() {
            rest = &rest[1..];
        }
        while !rest.is_empty() {
            match rest {
                [SExpr::Global(name), eq, value, tail @ ..] if eq.as_symbol() == Some("=") => {
                    self.begin_evaluation();
                    let v = self.evaluate_form(value)?;
                    debug!(global = %name, value = %v, "global defined");
                    self.globals.insert(name.clone(), v);
                    rest = tail;
                }
                _ => {
                    let shown: Vec<String> = rest.iter().map(ToString::to_string).collect();
                    return Err(TableError::InvalidExpression(format!(
                        "defglobal: expected ?*name* = value, found {}", shown.join(" ")
                    )));
                }
            }
        }
        Ok(())
    }

    /// `(defmodule NAME [comment] (import OTHER [deftable] ?ALL)* (export ...)*)`
    fn build_defmodule(&mut self, items: &[SExpr]) -> Result<()> {
        let name = items.get(1).and_then(SExpr::as_symbol)
            .ok_or_else(|| TableError::InvalidExpression("defmodule: missing module name".into()))?;
        let mut imports = Vec::new();
        for clause in &items[2..] {
            match (clause.head(), clause.as_list()) {
                (Some("import"), Some(parts)) => {
                    let module = parts.get(1).and_then(SExpr::as_symbol).ok_or_else(|| {
                        TableError::InvalidExpression(format!("defmodule {name}: malformed import {clause}"))
                    })?;
                    imports.push(module.to_string());
                }
                (Some("export"), _) => {}
                _ if matches!(clause, SExpr::Atom(Atom::Str(_))) => {}
                _ => {
                    return Err(TableError::InvalidExpression(format!("defmodule {name}: unexpected {clause}")));
                }
            }
        }
        self.catalog.define_module(name, imports)
    }

    // ── 求值 ──────────────────────────────────────────────────────────────────

    /// 编译并求值一个表达式。
    ///
    /// 错误在此处上报：记录日志、置位 evaluation-error 标志，并把 `Err` 返回给调用方。
    /// 查询算子出错时调用方得到的是 `Err`，而不是 `FALSE`。
    pub fn eval(&mut self, src: &str) -> Result<Value> {
        self.begin_evaluation();

        let result = read_one(src).and_then(|form| self.evaluate_form(&form));
        if let Err(e) = &result {
            warn!(error = %e, "evaluation failed");
            self.evaluation_error = true;
        }
        result
    }

    /// 每次顶层求值（eval、构造、定义期单元格）前清空 halt、错误标志与局部变量
    fn begin_evaluation(&mut self) {
        self.evaluation_error = false;
        self.halted = false;
        self.locals.clear();
    }

    fn evaluate_form(&mut self, form: &SExpr) -> Result<Value> {
        let expr = ExprCompiler::new(&self.catalog).compile(form)?;
        self.evaluate(&expr)
    }

    /// 最近一次 `eval` 是否出错
    pub fn evaluation_error(&self) -> bool { self.evaluation_error }

    /// 当前活跃的查询帧数
    pub fn active_queries(&self) -> usize { self.queries.len() }

    pub fn global(&self, name: &str) -> Option<&Value> { self.globals.get(name) }

    pub fn set_global(&mut self, name: &str, value: Value) {
        self.globals.insert(name.into(), value);
    }

    /// 取走 printout 累积的输出
    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }

    // ── 表函数 ────────────────────────────────────────────────────────────────

    pub fn table(&self, name: &str) -> Result<Rc<Table>> {
        self.catalog.find_table(name)
    }

    pub fn lookup(&self, table: &str, row_key: &Value, column_key: &Value) -> Result<Value> {
        self.table(table)?.lookup(row_key, column_key).cloned()
    }

    pub fn contains_key(&self, table: &str, row_key: &Value) -> Result<bool> {
        Ok(self.table(table)?.contains_key(row_key))
    }

    pub fn columns(&self, table: &str) -> Result<Vec<Atom>> {
        Ok(self.table(table)?.columns().to_vec())
    }

    pub fn row_count(&self, table: &str) -> Result<usize> {
        Ok(self.table(table)?.row_count())
    }

    pub fn undefine_table(&mut self, name: &str) -> Result<()> {
        self.catalog.remove_table(name)
    }

    /// 全部表的限定名
    pub fn table_names(&self) -> Vec<String> {
        self.catalog.tables().iter().map(|t| t.qualified_name()).collect()
    }

    pub fn pp_table(&self, name: &str) -> Result<String> {
        Ok(self.table(name)?.to_string())
    }

    pub fn current_module(&self) -> &str { self.catalog.current_module() }

    pub fn set_current_module(&mut self, name: &str) -> Result<()> {
        self.catalog.set_current_module(name)
    }
}

impl Default for Environment {
    fn default() -> Self { Self::new() }
}

impl CellEvaluator for Environment {
    fn evaluate_cell(&mut self, sx: &SExpr) -> Result<Value> {
        self.begin_evaluation();
        self.evaluate_form(sx)
    }
}
