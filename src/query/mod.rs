//! 表查询：编译期行变量改写 + 运行期帧栈
//!
//! | 算子              | 扫描方式            | 命中后           | 结果                   |
//! |-------------------|---------------------|------------------|------------------------|
//! | row-exists?       | 全表，首个命中即停  | 无               | TRUE / FALSE           |
//! | find-row          | 全表，首个命中即停  | 无               | 命中行第 0 列          |
//! | do-for-row        | 全表，首个命中即停  | 执行一次 action  | action 结果            |
//! | do-for-all-rows   | 全表，命中后继续    | 每个命中执行     | 最后一次 action 结果   |
//! | do-for-this-row   | 按键直接定位        | test 通过则执行  | action 结果 / 无此行   |

pub mod compiler;
pub mod runtime;

pub use runtime::{QueryFrame, QueryStack};
