//! 模块作用域的表注册表
//!
//! 名字解析顺序：`MOD::name` 直接定位；否则先查当前模块，再查（递归的）导入模块。
//! 导入链上多个模块同名时报 `AmbiguousTable`。

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use tracing::debug;

use crate::common::{Result, TableError, MAIN_MODULE};
use crate::table::Table;

#[derive(Debug)]
struct Module {
    name:    String,
    imports: Vec<String>,
    tables:  HashMap<String, Rc<Table>>,
    /// 定义顺序，供列举使用
    order:   Vec<String>,
}

impl Module {
    fn new(name: &str) -> Self {
        Self { name: name.into(), imports: vec![], tables: HashMap::new(), order: vec![] }
    }
}

#[derive(Debug)]
pub struct Catalog {
    modules: Vec<Module>,
    current: usize,
}

impl Catalog {
    pub fn new() -> Self {
        Self { modules: vec![Module::new(MAIN_MODULE)], current: 0 }
    }

    fn module_position(&self, name: &str) -> Option<usize> {
        self.modules.iter().position(|m| m.name == name)
    }

    pub fn current_module(&self) -> &str { &self.modules[self.current].name }

    pub fn set_current_module(&mut self, name: &str) -> Result<()> {
        self.current = self.module_position(name)
            .ok_or_else(|| TableError::UnknownModule(name.into()))?;
        Ok(())
    }

    /// 定义（或更新）模块并设为当前模块
    pub fn define_module(&mut self, name: &str, imports: Vec<String>) -> Result<()> {
        if let Some(missing) = imports.iter().find(|m| self.module_position(m).is_none()) {
            return Err(TableError::UnknownModule(missing.clone()));
        }
        let pos = match self.module_position(name) {
            Some(pos) => pos,
            None => {
                self.modules.push(Module::new(name));
                self.modules.len() - 1
            }
        };
        self.modules[pos].imports = imports;
        self.current = pos;
        debug!(module = name, "module defined");
        Ok(())
    }

    pub fn module_names(&self) -> Vec<String> {
        self.modules.iter().map(|m| m.name.clone()).collect()
    }

    pub fn module_imports(&self, name: &str) -> Option<&[String]> {
        self.module_position(name).map(|p| self.modules[p].imports.as_slice())
    }

    /// 安装到表自身记录的模块；同名旧表被固定时拒绝
    pub fn install(&mut self, table: Table) -> Result<Rc<Table>> {
        let pos = self.module_position(table.module())
            .ok_or_else(|| TableError::UnknownModule(table.module().into()))?;
        let module = &mut self.modules[pos];
        if let Some(old) = module.tables.get(table.name()) {
            if old.busy_count() > 0 {
                return Err(TableError::TableInUse {
                    table: old.qualified_name(), busy: old.busy_count(),
                });
            }
        } else {
            module.order.push(table.name().into());
        }
        let table = Rc::new(table);
        debug!(table = %table.qualified_name(), rows = table.row_count(), "table installed");
        module.tables.insert(table.name().into(), Rc::clone(&table));
        Ok(table)
    }

    /// 解析表名（可带 `MOD::` 前缀）
    pub fn find_table(&self, name: &str) -> Result<Rc<Table>> {
        if let Some((module, local)) = name.split_once("::") {
            let pos = self.module_position(module)
                .ok_or_else(|| TableError::UnknownModule(module.into()))?;
            return self.modules[pos].tables.get(local)
                .cloned()
                .ok_or_else(|| TableError::TableNotFound(name.into()));
        }

        let here = &self.modules[self.current];
        if let Some(t) = here.tables.get(name) {
            return Ok(Rc::clone(t));
        }

        let mut found: Vec<Rc<Table>> = Vec::new();
        let mut visited: HashSet<usize> = HashSet::from([self.current]);
        let mut pending: Vec<usize> = self.import_positions(self.current);
        while let Some(pos) = pending.pop() {
            if !visited.insert(pos) { continue; }
            if let Some(t) = self.modules[pos].tables.get(name) {
                found.push(Rc::clone(t));
            }
            pending.extend(self.import_positions(pos));
        }

        match found.len() {
            0 => Err(TableError::TableNotFound(name.into())),
            1 => Ok(found.remove(0)),
            _ => {
                let mut modules: Vec<String> = found.iter().map(|t| t.module().to_string()).collect();
                modules.sort();
                Err(TableError::AmbiguousTable { name: name.into(), modules })
            }
        }
    }

    fn import_positions(&self, pos: usize) -> Vec<usize> {
        self.modules[pos].imports.iter()
            .filter_map(|m| self.module_position(m))
            .collect()
    }

    /// 删除表；被查询固定时拒绝
    pub fn remove_table(&mut self, name: &str) -> Result<()> {
        let table = self.find_table(name)?;
        if table.busy_count() > 0 {
            return Err(TableError::TableInUse {
                table: table.qualified_name(), busy: table.busy_count(),
            });
        }
        let pos = self.module_position(table.module())
            .ok_or_else(|| TableError::UnknownModule(table.module().into()))?;
        let module = &mut self.modules[pos];
        module.tables.remove(table.name());
        module.order.retain(|n| n != table.name());
        debug!(table = %table.qualified_name(), "table undefined");
        Ok(())
    }

    /// 所有表，按模块定义顺序再按表定义顺序
    pub fn tables(&self) -> Vec<Rc<Table>> {
        self.modules.iter()
            .flat_map(|m| m.order.iter().filter_map(|n| m.tables.get(n)).cloned())
            .collect()
    }

    pub fn table_count(&self) -> usize {
        self.modules.iter().map(|m| m.tables.len()).sum()
    }

    /// 第一个仍被固定的表
    pub fn first_busy(&self) -> Option<Rc<Table>> {
        self.tables().into_iter().find(|t| t.busy_count() > 0)
    }
}

impl Default for Catalog {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::TableParts;
    use crate::value::{Atom, Value};

    fn table(module: &str, name: &str) -> Table {
        Table::build(TableParts {
            name:      name.into(),
            module:    module.into(),
            comment:   None,
            auto_keys: false,
            columns:   vec![Atom::symbol("k")],
            cells:     vec![Value::integer(1)],
        }).unwrap()
    }

    #[test]
    fn resolves_current_then_imports() {
        let mut c = Catalog::new();
        c.install(table("MAIN", "t")).unwrap();
        c.define_module("B", vec!["MAIN".into()]).unwrap();
        assert_eq!(c.current_module(), "B");
        assert_eq!(c.find_table("t").unwrap().module(), "MAIN");
        assert_eq!(c.find_table("MAIN::t").unwrap().name(), "t");
        assert!(matches!(c.find_table("B::t"), Err(TableError::TableNotFound(_))));
    }

    #[test]
    fn detects_ambiguity_across_imports() {
        let mut c = Catalog::new();
        c.define_module("A", vec![]).unwrap();
        c.install(table("A", "t")).unwrap();
        c.define_module("B", vec![]).unwrap();
        c.install(table("B", "t")).unwrap();
        c.define_module("C", vec!["A".into(), "B".into()]).unwrap();
        let err = c.find_table("t").unwrap_err();
        assert_eq!(err, TableError::AmbiguousTable {
            name: "t".into(), modules: vec!["A".into(), "B".into()],
        });
        // 本模块定义优先于导入
        c.install(table("C", "t")).unwrap();
        assert_eq!(c.find_table("t").unwrap().module(), "C");
    }

    #[test]
    fn pinned_table_cannot_be_removed_or_replaced() {
        let mut c = Catalog::new();
        let t = c.install(table("MAIN", "t")).unwrap();
        let pin = t.pin();
        assert!(matches!(c.remove_table("t"), Err(TableError::TableInUse { busy: 1, .. })));
        assert!(matches!(c.install(table("MAIN", "t")), Err(TableError::TableInUse { .. })));
        drop(pin);
        c.remove_table("t").unwrap();
        assert_eq!(c.table_count(), 0);
    }

    #[test]
    fn unknown_import_is_rejected() {
        let mut c = Catalog::new();
        assert_eq!(
            c.define_module("B", vec!["NOPE".into()]),
            Err(TableError::UnknownModule("NOPE".into()))
        );
    }
}
