// deftable 加载、重定义与表函数

use indexed_table::{Atom, EngineConfig, Environment, TableError, Value};

const ACCOUNTS: &str = r#"
(deftable accounts "customer balances"
   (id name balance)
   (1 "Al" 10)
   (2 "Bo" 20)
   (3 "Cy" 30))
"#;

#[test]
fn accounts_table_answers_lookups() {
    let mut env = Environment::new();
    assert_eq!(env.load(ACCOUNTS).unwrap(), 1);

    let one = Value::integer(1);
    assert_eq!(env.lookup("accounts", &one, &Value::symbol("name")).unwrap(), Value::string("Al"));
    assert_eq!(env.lookup("accounts", &Value::integer(3), &Value::symbol("balance")).unwrap(), Value::integer(30));
    assert!(env.contains_key("accounts", &Value::integer(2)).unwrap());
    assert!(!env.contains_key("accounts", &Value::integer(4)).unwrap());
    assert_eq!(env.row_count("accounts").unwrap(), 3);
    assert_eq!(
        env.columns("accounts").unwrap(),
        vec![Atom::symbol("id"), Atom::symbol("name"), Atom::symbol("balance")]
    );

    assert!(matches!(
        env.lookup("accounts", &Value::integer(9), &Value::symbol("name")),
        Err(TableError::NoRowForKey { .. })
    ));
    assert!(matches!(
        env.lookup("accounts", &one, &Value::symbol("email")),
        Err(TableError::NoColumnForKey { .. })
    ));
}

#[test]
fn table_functions_are_callable_from_expressions() {
    let mut env = Environment::new();
    env.load(ACCOUNTS).unwrap();
    assert_eq!(env.eval("(table-row-count accounts)").unwrap(), Value::integer(3));
    assert_eq!(env.eval("(contains-key accounts 2)").unwrap(), Value::boolean(true));
    assert_eq!(env.eval("(length$ (table-columns accounts))").unwrap(), Value::integer(3));
    assert_eq!(env.eval("(lookup accounts (+ 1 1) name)").unwrap(), Value::string("Bo"));
}

#[test]
fn string_and_symbol_keys_are_distinct() {
    let mut env = Environment::new();
    env.load(r#"(deftable kinds (k v) (red 1) ("red" 2) (1 3) (1.0 4))"#).unwrap();
    let v = Value::symbol("v");
    assert_eq!(env.lookup("kinds", &Value::symbol("red"), &v).unwrap(), Value::integer(1));
    assert_eq!(env.lookup("kinds", &Value::string("red"), &v).unwrap(), Value::integer(2));
    assert_eq!(env.lookup("kinds", &Value::integer(1), &v).unwrap(), Value::integer(3));
    assert_eq!(env.lookup("kinds", &Value::float(1.0), &v).unwrap(), Value::integer(4));
}

#[test]
fn composite_row_keys_match_in_order() {
    let mut env = Environment::new();
    env.load("(deftable edges (pair weight) ((a b) 1) ((b a) 2))").unwrap();
    assert_eq!(env.eval("(lookup edges (create$ b a) weight)").unwrap(), Value::integer(2));
    assert_eq!(env.eval("(lookup edges (create$ a b) weight)").unwrap(), Value::integer(1));
    assert!(env.eval("(lookup edges (create$ a) weight)").is_err());
}

#[test]
fn duplicate_key_definition_installs_nothing() {
    let mut env = Environment::new();
    let err = env.load("(deftable accounts (id name) (1 a) (1 b))").unwrap_err();
    assert!(matches!(err, TableError::DuplicateRowKey { .. }));
    assert!(env.table_names().is_empty());
}

#[test]
fn failed_redefinition_keeps_the_old_table() {
    let mut env = Environment::new();
    env.load(ACCOUNTS).unwrap();
    assert!(env.build("(deftable accounts (id name) (1 a) (1 b))").is_err());
    assert_eq!(env.row_count("accounts").unwrap(), 3);

    env.build("(deftable accounts (id name) (7 g))").unwrap();
    assert_eq!(env.row_count("accounts").unwrap(), 1);
    assert_eq!(env.table_names(), vec!["MAIN::accounts".to_string()]);
}

#[test]
fn auto_keys_number_rows_from_one() {
    let mut env = Environment::with_config(EngineConfig::default().with_auto_key_column("n"));
    env.load("(deftable colors (declare (auto-keys TRUE)) (name hex) (red ff0000) (green 00ff00))").unwrap();
    assert_eq!(env.columns("colors").unwrap()[0], Atom::symbol("n"));
    assert_eq!(env.eval("(lookup colors 2 name)").unwrap(), Value::symbol("green"));
    assert_eq!(env.eval("(find-row (?c colors) (eq ?c:name red))").unwrap(), Value::integer(1));
}

#[test]
fn globals_and_calls_in_cells_are_folded_at_definition() {
    let mut env = Environment::new();
    env.load(
        "(defglobal ?*rate* = 5)
         (deftable prices (item cost) (apple ?*rate*) (pear =(* ?*rate* 2)))",
    )
    .unwrap();
    env.eval("(bind ?*rate* 100)").unwrap();
    assert_eq!(env.eval("(lookup prices apple cost)").unwrap(), Value::integer(5));
    assert_eq!(env.eval("(lookup prices pear cost)").unwrap(), Value::integer(10));
}

#[test]
fn pretty_print_reloads_to_the_same_table() {
    let mut env = Environment::new();
    env.load(ACCOUNTS).unwrap();
    let pp = env.pp_table("accounts").unwrap();
    assert!(pp.starts_with("(deftable MAIN::accounts \"customer balances\""));

    let mut copy = Environment::new();
    copy.load(&pp).unwrap();
    assert_eq!(copy.pp_table("accounts").unwrap(), pp);
}

#[test]
fn unknown_constructs_are_rejected() {
    let mut env = Environment::new();
    assert!(matches!(env.load("(defrule r => (halt))"), Err(TableError::UnknownConstruct(_))));
    assert!(matches!(env.load("(deftable t (a) (1)"), Err(TableError::Syntax { .. })));
}

#[test]
fn qualified_definition_needs_an_existing_module() {
    let mut env = Environment::new();
    assert!(matches!(env.load("(deftable NOPE::t (a) (1))"), Err(TableError::UnknownModule(_))));
    env.load("(defmodule LIB) (defmodule MAIN (import LIB ?ALL)) (deftable LIB::t (a b) (1 2))").unwrap();
    assert_eq!(env.current_module(), "MAIN");
    assert_eq!(env.eval("(lookup t 1 b)").unwrap(), Value::integer(2));
}

#[test]
fn halt_while_loading_does_not_leak_into_later_constructs() {
    let mut env = Environment::new();
    env.load(ACCOUNTS).unwrap();
    let loaded = env
        .load(
            "(defglobal ?*a* = (halt))
             (defglobal ?*b* = (progn 1 2))
             (deftable t (k v) (1 =(do-for-all-rows (?x accounts) TRUE ?x:balance)))",
        )
        .unwrap();
    assert_eq!(loaded, 3);
    assert_eq!(env.global("b"), Some(&Value::integer(2)));
    assert_eq!(env.eval("(lookup t 1 v)").unwrap(), Value::integer(30));

    env.build("(defglobal ?*c* = (progn (halt) 1))").unwrap();
    env.build("(deftable u (k v) (1 =(progn 3 4)))").unwrap();
    assert_eq!(env.eval("(lookup u 1 v)").unwrap(), Value::integer(4));
}

#[test]
fn halt_in_one_cell_does_not_freeze_the_next() {
    let mut env = Environment::new();
    env.load("(deftable w (k v) (1 =(progn (halt) 5)) (2 =(progn 6 7)))").unwrap();
    assert_eq!(env.eval("(lookup w 2 v)").unwrap(), Value::integer(7));
}
