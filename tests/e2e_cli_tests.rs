use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::io::Write;
use std::process::Command;

fn bin() -> Command {
    let mut cmd = Command::cargo_bin("cliforge").expect("binary");
    cmd.env("XDG_CONFIG_HOME", "/nonexistent");
    cmd.env("XDG_STATE_HOME", std::env::temp_dir());
    cmd.env_remove("CLIFORGE_OUTPUT_FORMAT");
    cmd.env_remove("CLIFORGE_CONFIG");
    cmd.env_remove("NO_COLOR");
    cmd
}

#[test]
fn config_show_prints_the_merged_tree() {
    let mut cmd = bin();
    cmd.args(["config", "show"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("name: cliforge"))
        .stdout(predicate::str::contains("base_url: https://api.cliforge.dev"));
}

#[test]
fn env_override_wins_over_embedded_default() {
    let mut cmd = bin();
    cmd.env("CLIFORGE_OUTPUT_FORMAT", "yaml");
    cmd.args(["config", "show"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("format: yaml"));
}

#[test]
fn user_preferences_apply_but_locked_paths_do_not() {
    let mut user = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .expect("temp file");
    write!(
        user,
        r#"
preferences:
  defaults:
    output:
      format: table
  api:
    base_url: https://evil.example
"#
    )
    .expect("write user config");

    let mut cmd = bin();
    cmd.args(["--config", user.path().to_str().unwrap(), "config", "show"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("format: table"))
        .stdout(predicate::str::contains("base_url: https://api.cliforge.dev"))
        .stdout(predicate::str::contains("https://evil.example").not());
}

#[test]
fn debug_override_warns_on_release_builds() {
    let mut user = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .expect("temp file");
    write!(
        user,
        r#"
debug_override:
  api:
    base_url: https://localhost:9999
"#
    )
    .expect("write user config");

    let mut cmd = bin();
    cmd.args(["--config", user.path().to_str().unwrap(), "config", "show"]);
    cmd.assert()
        .success()
        .stderr(predicate::str::contains("debug"))
        .stdout(predicate::str::contains("base_url: https://api.cliforge.dev"));
}

#[test]
fn invalid_user_preferences_fail_with_config_exit_code() {
    let mut user = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .expect("temp file");
    write!(
        user,
        r#"
preferences:
  defaults:
    output:
      format: csv
"#
    )
    .expect("write user config");

    let mut cmd = bin();
    cmd.args(["--config", user.path().to_str().unwrap(), "config", "show"]);
    cmd.assert().failure().code(predicate::eq(2));
}

#[test]
fn unknown_profile_is_a_config_error() {
    let mut cmd = bin();
    cmd.args(["--profile", "qa", "config", "show"]);
    cmd.assert()
        .failure()
        .code(predicate::eq(2))
        .stderr(predicate::str::contains("qa"));
}

#[test]
fn skipped_step_workflow_completes() {
    let mut file = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .expect("temp file");
    write!(
        file,
        r#"
name: guarded
steps:
  - id: guarded
    condition: "flags.enabled == true"
    api_call:
      endpoint: /never-called
"#
    )
    .expect("write workflow");

    let mut cmd = bin();
    cmd.args([
        "workflow",
        "run",
        file.path().to_str().unwrap(),
        "--flag",
        "enabled=false",
    ]);
    cmd.assert().success();
}

#[test]
fn workflow_list_renders_checkpoints() {
    let state_dir = tempfile::tempdir().expect("temp dir");
    let mut run = bin();
    run.env("XDG_STATE_HOME", state_dir.path());
    let mut file = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .expect("temp file");
    write!(
        file,
        r#"
name: listed
steps:
  - id: only
    noop: {{}}
"#
    )
    .expect("write workflow");
    run.args(["workflow", "run", file.path().to_str().unwrap()]);
    run.assert().success();

    let mut list = bin();
    list.env("XDG_STATE_HOME", state_dir.path());
    list.args(["workflow", "list"]);
    list.assert()
        .success()
        .stdout(predicate::str::contains("listed"));
}
