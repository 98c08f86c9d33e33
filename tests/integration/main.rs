//! Integration tests for Plinth

mod pipeline_tests;

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    /// Isolated project: config, cache, state and source all under one temp dir
    struct Project {
        dir: TempDir,
    }

    impl Project {
        fn new(build_script: &str) -> Self {
            let dir = TempDir::new().unwrap();
            let root = dir.path();
            std::fs::create_dir_all(root.join("src")).unwrap();
            std::fs::write(root.join("src/main.py"), "print('hello')").unwrap();
            std::fs::write(root.join("requirements.txt"), "requests *\n").unwrap();

            let install_log = root.join("installs.log");
            let config = format!(
                r#"[general]
journal = false

[base]
image = "test-image:1"

[install]
command = ["sh", "-c", "mkdir -p {{root}}/site && cp {{manifest}} {{root}}/site/requirements.txt && echo run >> {log}"]

[build]
command = ["sh", "-c", "{build}"]

[cache]
dir = "{cache}"
"#,
                log = install_log.display(),
                build = build_script,
                cache = root.join("cache").display(),
            );
            std::fs::write(root.join("config.toml"), config).unwrap();

            Self { dir }
        }

        fn path(&self) -> &Path {
            self.dir.path()
        }

        fn config(&self) -> PathBuf {
            self.path().join("config.toml")
        }

        fn cmd(&self) -> Command {
            let mut cmd = cargo_bin_cmd!("plinth");
            cmd.current_dir(self.path())
                .env("XDG_STATE_HOME", self.path().join("state"))
                .env("XDG_CONFIG_HOME", self.path().join("xdg-config"))
                .env_remove("PLINTH_CONFIG")
                .arg("--no-local")
                .arg("-c")
                .arg(self.config());
            cmd
        }

        fn run_json(&self) -> serde_json::Value {
            let output = self
                .cmd()
                .args(["run", "--source", "src", "--format", "json"])
                .output()
                .unwrap();
            assert!(
                output.status.success(),
                "run failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
            serde_json::from_slice(&output.stdout).unwrap()
        }

        fn installs(&self) -> usize {
            std::fs::read_to_string(self.path().join("installs.log"))
                .map(|s| s.lines().count())
                .unwrap_or(0)
        }
    }

    const BUILD_OK: &str = "mkdir -p {root}/dist && cp main.py {root}/dist/main.py";

    fn plinth() -> Command {
        cargo_bin_cmd!("plinth")
    }

    fn statuses(run: &serde_json::Value) -> Vec<String> {
        run["steps"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["status"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn help_displays() {
        plinth()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("nvironment provisioning"));
    }

    #[test]
    fn version_displays() {
        plinth()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("plinth"));
    }

    #[test]
    fn config_path() {
        let project = Project::new(BUILD_OK);
        project
            .cmd()
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let project = Project::new(BUILD_OK);
        project
            .cmd()
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[general]"))
            .stdout(predicate::str::contains("test-image:1"));
    }

    #[cfg(unix)]
    #[test]
    fn second_run_is_served_from_cache() {
        let project = Project::new(BUILD_OK);

        let first = project.run_json();
        let second = project.run_json();

        assert_eq!(first["fingerprint"], second["fingerprint"]);
        assert_eq!(first["layers"], 4);
        assert_eq!(statuses(&first), vec!["executed"; 4]);
        assert_eq!(statuses(&second), vec!["cached"; 4]);
        assert_eq!(project.installs(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn plan_reports_hits_after_run() {
        let project = Project::new(BUILD_OK);

        project
            .cmd()
            .args(["plan", "--source", "src"])
            .assert()
            .success()
            .stdout(predicate::str::contains("4 of 4 step(s) would execute"));

        project.run_json();

        let output = project
            .cmd()
            .args(["plan", "--source", "src", "--format", "json"])
            .output()
            .unwrap();
        let plan: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        let rows = plan.as_array().unwrap();
        assert_eq!(rows.len(), 4);
        assert!(rows.iter().all(|r| r["status"] == "hit"));
    }

    #[cfg(unix)]
    #[test]
    fn empty_manifest_skips_dependencies() {
        let project = Project::new(BUILD_OK);
        std::fs::write(project.path().join("requirements.txt"), "# none\n").unwrap();

        let run = project.run_json();
        assert_eq!(run["layers"], 3);
        assert_eq!(statuses(&run), vec!["executed", "skipped", "executed", "executed"]);
        assert_eq!(project.installs(), 0);
    }

    #[test]
    fn malformed_manifest_names_line() {
        let project = Project::new(BUILD_OK);
        std::fs::write(project.path().join("requirements.txt"), "requests\nflask >=\n").unwrap();

        project
            .cmd()
            .args(["run", "--source", "src"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("line 2"));
    }

    #[test]
    fn missing_source_fails() {
        let project = Project::new(BUILD_OK);
        project
            .cmd()
            .args(["run", "--source", "does-not-exist"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Path not found"));
    }

    #[cfg(unix)]
    #[test]
    fn build_failure_is_replayed_from_cache() {
        let project = Project::new("echo 'syntax error' >&2; exit 1");

        project
            .cmd()
            .args(["run", "--source", "src", "--format", "json"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("step 'package'"))
            .stderr(predicate::str::contains("syntax error"));

        project
            .cmd()
            .args(["run", "--source", "src", "--format", "json"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("[cached]"))
            .stderr(predicate::str::contains("plinth cache forget"));

        assert_eq!(project.installs(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn cache_list_forget_and_clear() {
        let project = Project::new(BUILD_OK);
        let run = project.run_json();
        let fingerprint = run["fingerprint"].as_str().unwrap().to_string();

        let output = project
            .cmd()
            .args(["cache", "list", "--format", "json"])
            .output()
            .unwrap();
        let entries: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(entries.as_array().unwrap().len(), 4);

        project
            .cmd()
            .args(["cache", "info", &fingerprint[..12]])
            .assert()
            .success()
            .stdout(predicate::str::contains("package"));

        project
            .cmd()
            .args(["cache", "forget", &fingerprint[..12]])
            .assert()
            .success()
            .stdout(predicate::str::contains("Forgot"));

        project
            .cmd()
            .args(["cache", "clear", "--yes"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Cleared 3"));

        project
            .cmd()
            .args(["cache", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No cache entries found"));
    }

    #[test]
    fn cache_info_unknown_fingerprint() {
        let project = Project::new(BUILD_OK);
        project
            .cmd()
            .args(["cache", "info", "deadbeef"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Cache entry not found"));
    }
}
