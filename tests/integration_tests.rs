//! Integration tests for the tion binary.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

const CONFIG_VARS: &[&str] = &[
    "CURSOR_API_KEY",
    "PORT",
    "HOST",
    "WORKSPACE",
    "AGENT_BIN",
    "AGENT_TIMEOUT_SECS",
    "STREAM_BUFFER",
    "GITHUB_REPO",
    "GITHUB_TOKEN",
    "NETLIFY_AUTH_TOKEN",
    "NETLIFY_SITE_ID",
    "DATABASE_PATH",
    "API_KEY",
    "DEBUG",
    "SERVICE_NAME",
    "VERSION",
    "LOG_FORMAT",
    "RUST_LOG",
];

/// A tion command running in `dir` with none of our variables inherited.
fn tion(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("tion");
    cmd.current_dir(dir.path());
    for var in CONFIG_VARS {
        cmd.env_remove(var);
    }
    cmd
}

fn create_workspace() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("frontends/site")).unwrap();
    fs::write(dir.path().join("frontends/site/package.json"), "{}").unwrap();
    dir
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_tion_help() {
        let dir = TempDir::new().unwrap();
        tion(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("serve"))
            .stdout(predicate::str::contains("catalog"))
            .stdout(predicate::str::contains("check-config"));
    }

    #[test]
    fn test_tion_version() {
        let dir = TempDir::new().unwrap();
        tion(&dir)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_unknown_subcommand_fails() {
        let dir = TempDir::new().unwrap();
        tion(&dir).arg("frobnicate").assert().failure();
    }
}

// =============================================================================
// check-config
// =============================================================================

mod check_config {
    use super::*;

    #[test]
    fn test_check_config_requires_api_key() {
        let dir = create_workspace();
        tion(&dir)
            .env("WORKSPACE", dir.path())
            .arg("check-config")
            .assert()
            .failure()
            .stderr(predicate::str::contains("CURSOR_API_KEY is required"));
    }

    #[test]
    fn test_check_config_masks_secrets() {
        let dir = create_workspace();
        tion(&dir)
            .env("WORKSPACE", dir.path())
            .env("CURSOR_API_KEY", "sk-verysecretvalue")
            .arg("check-config")
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration OK"))
            .stdout(predicate::str::contains("sk-v****"))
            .stdout(predicate::str::contains("verysecretvalue").not());
    }

    #[test]
    fn test_check_config_reads_dotenv() {
        let dir = create_workspace();
        fs::write(
            dir.path().join(".env"),
            format!(
                "CURSOR_API_KEY=from-dotenv\nWORKSPACE={}\nPORT=9191\n",
                dir.path().display()
            ),
        )
        .unwrap();
        tion(&dir)
            .arg("check-config")
            .assert()
            .success()
            .stdout(predicate::str::contains(":9191"));
    }

    #[test]
    fn test_check_config_rejects_bad_port() {
        let dir = create_workspace();
        tion(&dir)
            .env("CURSOR_API_KEY", "k")
            .env("PORT", "not-a-port")
            .arg("check-config")
            .assert()
            .failure()
            .stderr(predicate::str::contains("PORT"));
    }
}

// =============================================================================
// catalog
// =============================================================================

mod catalog {
    use super::*;

    #[test]
    fn test_catalog_init_creates_database() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("data/catalog.db");
        tion(&dir)
            .args(["catalog", "--init", "--db-path"])
            .arg(&db_path)
            .assert()
            .success()
            .stdout(predicate::str::contains("Catalog database initialized"));
        assert!(db_path.exists());

        // Running it again keeps the existing database.
        tion(&dir)
            .args(["catalog", "--init", "--db-path"])
            .arg(&db_path)
            .assert()
            .success();
    }
}

// =============================================================================
// serve
// =============================================================================

mod serve {
    use super::*;

    #[test]
    fn test_serve_without_api_key_fails_fast() {
        let dir = create_workspace();
        tion(&dir)
            .env("WORKSPACE", dir.path())
            .args(["serve", "--port", "0"])
            .assert()
            .failure();
    }
}
