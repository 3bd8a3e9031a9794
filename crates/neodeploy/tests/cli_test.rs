mod common;

use common::{SCENARIOS_WITH_ENV_CREDENTIAL, TestProject, neodeploy_in};
use predicates::prelude::*;

#[test]
fn test_cli_help() {
    let project = TestProject::new();
    project
        .neodeploy()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("setup"))
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("deploy"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("cleanup"));
}

#[test]
fn test_cli_version() {
    let project = TestProject::new();
    project
        .neodeploy()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("neodeploy"));
}

#[test]
fn test_invalid_command() {
    let project = TestProject::new();
    project.neodeploy().arg("invalid-command").assert().failure();
}

#[test]
fn test_setup_creates_workspace() {
    let project = TestProject::new();
    project
        .neodeploy()
        .args(["setup", "--region", "westeurope", "--owner", "dba@example.com"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Workspace created"));

    let dir = project.workspace_dir();
    assert!(dir.join("settings.yaml").is_file());
    assert!(dir.join("scenarios.yaml").is_file());
    let settings = std::fs::read_to_string(dir.join("settings.yaml")).unwrap();
    assert!(settings.contains("westeurope"));
}

#[test]
fn test_setup_twice_requires_force() {
    let project = TestProject::initialized();
    project.neodeploy().arg("setup").assert().code(3);
    project
        .neodeploy()
        .args(["setup", "--force"])
        .assert()
        .success();
}

#[test]
fn test_validate_prints_plan() {
    let project = TestProject::initialized();
    project
        .neodeploy()
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("standalone-v5"))
        .stdout(predicate::str::contains("cluster-v5"))
        .stdout(predicate::str::contains("neo4j-enterprise"))
        .stdout(predicate::str::contains("4 scenario(s) valid"));
}

#[test]
fn test_validate_without_az_skips_template_check() {
    let project = TestProject::initialized();
    project
        .neodeploy()
        .args(["validate", "--scenario", "standalone-v5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("skipping template validation"))
        .stdout(predicate::str::contains("1 scenario(s) valid"));

    project
        .neodeploy()
        .args(["validate", "--scenario", "standalone-v5", "--offline"])
        .assert()
        .success()
        .stdout(predicate::str::contains("skipping template validation").not());
}

#[test]
fn test_validate_never_prints_supplied_password() {
    let project = TestProject::initialized();
    project.write_scenarios(SCENARIOS_WITH_ENV_CREDENTIAL);
    project
        .neodeploy()
        .arg("validate")
        .env("NEODEPLOY_TEST_PASSWORD", "pw-that-must-not-leak")
        .assert()
        .success()
        .stdout(predicate::str::contains("env:NEODEPLOY_TEST_PASSWORD"))
        .stdout(predicate::str::contains("[REDACTED]"))
        .stdout(predicate::str::contains("pw-that-must-not-leak").not())
        .stderr(predicate::str::contains("pw-that-must-not-leak").not());
}

#[test]
fn test_validate_single_scenario() {
    let project = TestProject::initialized();
    project
        .neodeploy()
        .args(["validate", "--scenario", "community-v5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("neo4j-community"))
        .stdout(predicate::str::contains("1 scenario(s) valid"));
}

#[test]
fn test_validate_unknown_scenario() {
    let project = TestProject::initialized();
    project
        .neodeploy()
        .args(["validate", "--scenario", "does-not-exist"])
        .assert()
        .code(3);
}

#[test]
fn test_invalid_scenarios_exit_3() {
    let project = TestProject::initialized();
    project.write_scenarios(
        r#"
scenarios:
  - name: broken
    edition: enterprise-standalone
    node_count: 3
    version: "5"
    sizing: { vm_size: Standard_E4s_v5, disk_size_gb: 32 }
"#,
    );
    project
        .neodeploy()
        .arg("validate")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("broken"));
}

#[test]
fn test_unknown_scenario_field_exit_3() {
    let project = TestProject::initialized();
    project.write_scenarios(
        r#"
scenarios:
  - name: typo
    edition: community
    node_count: 1
    version: "5"
    sizing: { vm_size: Standard_B2s, disk_size_gb: 32 }
    nodecount: 1
"#,
    );
    project.neodeploy().arg("validate").assert().code(3);
}

#[test]
fn test_outside_workspace_exit_3() {
    let dir = tempfile::tempdir().unwrap();
    neodeploy_in(dir.path())
        .arg("validate")
        .assert()
        .code(3)
        .stderr(predicate::str::contains(".neodeploy"));
}

#[test]
fn test_workspace_found_from_subdirectory() {
    let project = TestProject::initialized();
    let nested = project.path().join("a").join("b");
    std::fs::create_dir_all(&nested).unwrap();
    neodeploy_in(&nested).arg("validate").assert().success();
}

#[test]
fn test_deploy_dry_run_creates_nothing() {
    let project = TestProject::initialized();
    project
        .neodeploy()
        .args(["deploy", "--all", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Dry run"));

    let deployments = project.deployments_dir();
    let count = std::fs::read_dir(&deployments)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(count, 0);
}

#[test]
fn test_deploy_requires_selection() {
    let project = TestProject::initialized();
    project
        .neodeploy()
        .args(["deploy", "--dry-run"])
        .assert()
        .code(3);
}

#[test]
fn test_deploy_rejects_invalid_cleanup_mode() {
    let project = TestProject::initialized();
    project
        .neodeploy()
        .args(["deploy", "--all", "--dry-run", "--cleanup-mode", "sometimes"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("sometimes"));
}

#[test]
fn test_status_empty_workspace() {
    let project = TestProject::initialized();
    project
        .neodeploy()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("No deployments recorded"));
    project
        .neodeploy()
        .args(["status", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("[]"));
}

#[test]
fn test_cleanup_requires_target() {
    let project = TestProject::initialized();
    project.neodeploy().arg("cleanup").assert().failure();
}

#[test]
fn test_cleanup_dry_run_all() {
    let project = TestProject::initialized();
    project
        .neodeploy()
        .args(["cleanup", "--all", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to clean up"));
}

#[test]
fn test_cleanup_unknown_deployment_exit_3() {
    let project = TestProject::initialized();
    project
        .neodeploy()
        .args(["cleanup", "--deployment", "deadbeef", "--dry-run"])
        .assert()
        .code(3);
}
