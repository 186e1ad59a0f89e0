use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn cli(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("petition-flow").unwrap();
    cmd.current_dir(dir.path())
        .env(
            "PETITION_FLOW_DATABASE__URL",
            dir.path().join("cli.db").display().to_string(),
        )
        .env(
            "PETITION_FLOW_DOCUMENTS__OUTPUT_DIR",
            dir.path().join("docs").display().to_string(),
        )
        .env("PETITION_FLOW_OBSERVABILITY__LOG_LEVEL", "warn");
    cmd
}

#[test]
fn test_help_lists_commands() {
    let dir = TempDir::new().unwrap();
    cli(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("queue"))
        .stdout(predicate::str::contains("regenerate"))
        .stdout(predicate::str::contains("migrate"));
}

#[test]
fn test_types_lists_seeded_chains() {
    let dir = TempDir::new().unwrap();
    cli(&dir).arg("migrate").assert().success();
    cli(&dir)
        .arg("types")
        .assert()
        .success()
        .stdout(predicate::str::contains("Change of Major"))
        .stdout(predicate::str::contains("advisor -> chairperson -> dean"));
}

#[test]
fn test_show_unknown_petition_fails() {
    let dir = TempDir::new().unwrap();
    cli(&dir)
        .args(["show", "42", "--user", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_queue_requires_user() {
    let dir = TempDir::new().unwrap();
    cli(&dir).arg("queue").assert().failure();
}
