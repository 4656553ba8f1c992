#![cfg(feature = "storage-rocksdb")]

use assert_cmd::cargo_bin;
use std::io::Write;
use std::process::Command;
use tempfile::tempdir;

const CONFIG: &str =
    r#"{ "accounts": [ { "id": "acc-1", "min_balance": "0", "opening_balance": "100" } ] }"#;

fn run(db_path: &std::path::Path, config: &std::path::Path, rows: &[&str]) -> String {
    let mut csv = tempfile::NamedTempFile::new().unwrap();
    writeln!(csv, "type, account, txn, amount, status, reference, message").unwrap();
    for row in rows {
        writeln!(csv, "{}", row).unwrap();
    }

    let output = Command::new(cargo_bin!("paysettle"))
        .arg(csv.path())
        .arg("--config")
        .arg(config)
        .arg("--db-path")
        .arg(db_path)
        .output()
        .expect("Failed to execute command");
    assert!(output.status.success());
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_rocksdb_persistence_recovery() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test_db");
    let config = dir.path().join("config.json");
    std::fs::write(&config, CONFIG).unwrap();

    // 1. First run: opening balance plus a pay-in left pending.
    let stdout1 = run(&db_path, &config, &["payin, acc-1, T1, 50, , ,"]);
    assert!(stdout1.contains("acc-1,100,0,100"));

    // 2. Second run: the account is not re-opened and the pending record survived.
    let stdout2 = run(
        &db_path,
        &config,
        &["callback, , T1, , success, UTR1,", "callback, , T1, , success, UTR1,"],
    );
    assert!(stdout2.contains("acc-1,150,0,150"));
}
