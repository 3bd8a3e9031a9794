use assert_cmd::Command;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const SCENARIOS_WITH_ENV_CREDENTIAL: &str = r#"
scenarios:
  - name: standalone-v5
    edition: enterprise-standalone
    node_count: 1
    version: "5"
    license: evaluation
    sizing: { vm_size: Standard_E4s_v5, disk_size_gb: 32 }
    credential: { source: environment, variable: NEODEPLOY_TEST_PASSWORD }
"#;

/// A scratch directory isolated from the caller's workspace and user config
pub struct TestProject {
    pub root: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        Self { root }
    }

    /// A project with `setup` already run
    #[allow(dead_code)]
    pub fn initialized() -> Self {
        let project = Self::new();
        project
            .neodeploy()
            .args(["setup", "--subscription", "00000000-0000-0000-0000-000000000000"])
            .assert()
            .success();
        project
    }

    pub fn path(&self) -> PathBuf {
        self.root.path().to_path_buf()
    }

    pub fn workspace_dir(&self) -> PathBuf {
        self.root.path().join(".neodeploy")
    }

    #[allow(dead_code)]
    pub fn write_scenarios(&self, content: &str) {
        fs::write(self.workspace_dir().join("scenarios.yaml"), content).unwrap();
    }

    #[allow(dead_code)]
    pub fn deployments_dir(&self) -> PathBuf {
        self.workspace_dir().join("state").join("deployments")
    }

    /// `neodeploy` running inside the project
    pub fn neodeploy(&self) -> Command {
        neodeploy_in(self.root.path())
    }
}

#[allow(deprecated)] // TODO: move to cargo_bin_cmd! once assert_cmd 2.1 is the minimum
pub fn neodeploy_in(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("neodeploy").unwrap();
    cmd.current_dir(dir)
        .env_remove("NEODEPLOY_HOME")
        .env_remove("AZURE_SUBSCRIPTION_ID")
        .env_remove("RUST_LOG")
        .env("NO_COLOR", "1")
        .env("HOME", dir)
        .env("XDG_CONFIG_HOME", dir.join(".config"))
        // keep a locally installed az from reaching Azure
        .env("PATH", dir.join(".no-tools"));
    cmd
}
