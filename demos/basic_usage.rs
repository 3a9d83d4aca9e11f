//! # indexed-table 使用案例
//!
//! 1. 定义表（普通表 + auto-keys 表）
//! 2. 按行键 / 列名查找
//! 3. 五种查询算子与嵌套查询
//! 4. 重定义与删除时的固定检查
//! 5. 快照保存并在新环境重载

use indexed_table::{Environment, Result, Value};

fn main() -> Result<()> {
    let mut env = Environment::new();

    // ── 1. 定义 ───────────────────────────────────────────────────────────────
    env.load(
        r#"
        (defglobal ?*bonus* = 5)

        (deftable accounts "customer balances"
           (id name balance)
           (1 "Al" 10)
           (2 "Bo" 20)
           (3 "Cy" =(+ 25 ?*bonus*)))

        (deftable tags (declare (auto-keys TRUE))
           (account tag)
           (1 vip)
           (3 vip)
           (3 new))

        (defglobal ?*total* = 0)
        "#,
    )?;
    println!("tables: {:?}", env.table_names());
    println!("{}\n", env.pp_table("accounts")?);

    // ── 2. 查找 ───────────────────────────────────────────────────────────────
    let name = env.lookup("accounts", &Value::integer(2), &Value::symbol("name"))?;
    println!("accounts[2].name = {name}");
    println!("accounts[3].balance = {}", env.eval("(lookup accounts 3 balance)")?);

    // ── 3. 查询 ───────────────────────────────────────────────────────────────
    println!("rich exists? {}", env.eval("(row-exists? (?a accounts) (> ?a:balance 25))")?);
    println!("first over 15: {}", env.eval("(find-row (?a accounts) (> ?a:balance 15))")?);

    env.eval("(do-for-all-rows (?a accounts) TRUE (bind ?*total* (+ ?*total* ?a:balance)))")?;
    println!("total balance = {}", env.global("total").cloned().unwrap_or_else(Value::false_value));

    env.eval(
        r#"(do-for-all-rows (?t tags) (eq ?t:tag vip)
              (do-for-this-row (?a accounts ?t:account) TRUE
                 (printout t ?a:name " is vip" crlf)))"#,
    )?;
    print!("{}", env.take_output());

    // ── 4. 固定检查 ───────────────────────────────────────────────────────────
    if let Err(e) = env.eval("(do-for-row (?a accounts) TRUE (undeftable accounts))") {
        println!("undeftable during scan refused: {e}");
    }

    // ── 5. 快照 ───────────────────────────────────────────────────────────────
    let bytes = env.save_snapshot()?;
    let mut restored = Environment::new();
    restored.load_snapshot(&bytes)?;
    println!(
        "snapshot: {} bytes, restored tables {:?}, accounts[1].name = {}",
        bytes.len(),
        restored.table_names(),
        restored.eval("(lookup accounts 1 name)")?,
    );
    Ok(())
}
