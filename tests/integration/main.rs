//! Integration tests for Cairn

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use tempfile::TempDir;

    fn cairn() -> Command {
        cargo_bin_cmd!("cairn")
    }

    /// A command pointed at an isolated cache root and empty config
    fn cairn_with_cache(cache_root: &TempDir) -> Command {
        let mut cmd = cairn();
        cmd.env("XDG_CACHE_HOME", cache_root.path());
        cmd.env_remove("CAIRN_CONFIG");
        cmd
    }

    #[test]
    fn help_displays() {
        cairn()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Container Image to VM Disk"));
    }

    #[test]
    fn version_displays() {
        cairn()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("cairn"));
    }

    #[test]
    fn pull_rejects_invalid_platform() {
        let cache = TempDir::new().unwrap();
        cairn_with_cache(&cache)
            .args(["pull", "alpine:3.18", "--platform", "linux"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid platform"))
            // The artifact-path contract: nothing on stdout unless we succeed
            .stdout(predicate::str::is_empty());
    }

    #[test]
    fn pull_rejects_three_part_platform() {
        let cache = TempDir::new().unwrap();
        cairn_with_cache(&cache)
            .args(["pull", "alpine:3.18", "--platform", "linux/arm/v7"])
            .assert()
            .failure()
            .stdout(predicate::str::is_empty());
    }

    #[test]
    fn missing_cache_root_is_fatal() {
        cairn()
            .args(["cache", "list"])
            .env_remove("XDG_CACHE_HOME")
            .env_remove("HOME")
            .env_remove("CAIRN_CONFIG")
            .assert()
            .failure()
            .stderr(predicate::str::contains("cannot determine cache directory"));
    }

    #[test]
    fn cache_list_empty() {
        let cache = TempDir::new().unwrap();
        cairn_with_cache(&cache)
            .args(["cache", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No cached images"));
    }

    #[test]
    fn cache_clear_empty() {
        let cache = TempDir::new().unwrap();
        cairn_with_cache(&cache)
            .args(["cache", "clear", "--yes"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already empty"));
    }

    #[test]
    fn cache_list_shows_prepared_entry() {
        let cache = TempDir::new().unwrap();

        // Lay out one complete entry by hand
        let entry = cache.path().join("cairn").join("images").join(
            "0000000000000000000000000000000000000000000000000000000000000000",
        );
        std::fs::create_dir_all(&entry).unwrap();
        std::fs::write(entry.join("image.erofs"), b"fake image").unwrap();
        std::fs::write(
            entry.join("config.json"),
            r#"{"os": "linux", "architecture": "amd64"}"#,
        )
        .unwrap();

        cairn_with_cache(&cache)
            .args(["cache", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("linux/amd64"))
            .stdout(predicate::str::contains("complete"));
    }

    #[test]
    fn config_show_prints_toml() {
        let cache = TempDir::new().unwrap();
        cairn_with_cache(&cache)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[image]"))
            .stdout(predicate::str::contains("ubuntu:20.04"));
    }

    #[test]
    fn config_path_names_file() {
        cairn()
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn custom_config_overrides_defaults() {
        let cache = TempDir::new().unwrap();
        let config_dir = TempDir::new().unwrap();
        let config_path = config_dir.path().join("config.toml");
        std::fs::write(
            &config_path,
            r#"
[image]
reference = "alpine:3.18"
platform = "linux/arm64"
"#,
        )
        .unwrap();

        cairn_with_cache(&cache)
            .args(["config", "show"])
            .args(["--config", config_path.to_str().unwrap()])
            .assert()
            .success()
            .stdout(predicate::str::contains("alpine:3.18"))
            .stdout(predicate::str::contains("linux/arm64"));
    }

    #[test]
    fn invalid_config_file_fails() {
        let cache = TempDir::new().unwrap();
        let config_dir = TempDir::new().unwrap();
        let config_path = config_dir.path().join("config.toml");
        std::fs::write(&config_path, "image = not toml").unwrap();

        cairn_with_cache(&cache)
            .args(["config", "show"])
            .args(["--config", config_path.to_str().unwrap()])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }
}
