// Command-line tests: run the built `pour` binary with an isolated environment
// None of these touch the network

#[cfg(unix)]
use pour::checksum::sha256_hex;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

const NIHONGO_LINUX_SHA256: &str =
    "df5d67d1924e4291ff3857801b30a5e582270ebc6725cde6da1ba2300a63be31";

/// `pour` with settings isolated to `home`
fn pour(home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_pour"))
        .args(args)
        .env("POUR_CONFIG", home.join("config.toml"))
        .env("NO_COLOR", "1")
        .env_remove("POUR_CATALOG")
        .env_remove("POUR_INSTALL_DIR")
        .env_remove("POUR_PREFIX")
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run pour")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_resolve_builtin_release() {
    let home = TempDir::new().unwrap();
    let output = pour(
        home.path(),
        &["resolve", "1.4.0", "--platform", "linux-x86_64"],
    );

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let out = stdout(&output);
    assert!(out.contains("releases/download/v1.4.0/nihongo-linux"));
    assert!(out.contains(NIHONGO_LINUX_SHA256));
}

#[test]
fn test_resolve_json() {
    let home = TempDir::new().unwrap();
    let output = pour(
        home.path(),
        &["--json", "resolve", "latest", "--platform", "macos-arm64"],
    );

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let entry: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(entry["version"], "1.4.0");
    assert_eq!(entry["platform"]["os"], "macos");
    assert_eq!(
        entry["sha256"],
        "41337d64961d035292553425321e1d583788dbba54c33deb8e7de158d36cc868"
    );
}

#[test]
fn test_resolve_unknown_version_exits_2() {
    let home = TempDir::new().unwrap();
    let output = pour(
        home.path(),
        &["resolve", "9.9.9", "--platform", "linux-x86_64"],
    );

    assert_eq!(output.status.code(), Some(2));
    let err = stderr(&output);
    assert!(err.contains("9.9.9"));
    assert!(err.contains("hint:"));
}

#[test]
fn test_list_versions() {
    let home = TempDir::new().unwrap();
    let output = pour(home.path(), &["list", "--platform", "linux-aarch64"]);

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("1.4.0"));
}

#[test]
fn test_check_catalog_rejects_duplicates() {
    let home = TempDir::new().unwrap();
    let file = home.path().join("catalog.toml");
    std::fs::write(
        &file,
        r#"
binary = "nihongo"
url_template = "https://example.test/v{version}/nihongo-{os}"

[[release]]
version = "1.6.0-beta"
os = "linux"
sha256 = "df5d67d1924e4291ff3857801b30a5e582270ebc6725cde6da1ba2300a63be31"

[[release]]
version = "1.6.0-beta"
os = "linux"
sha256 = "41337d64961d035292553425321e1d583788dbba54c33deb8e7de158d36cc868"
"#,
    )
    .unwrap();

    let output = pour(home.path(), &["check-catalog", file.to_str().unwrap()]);

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("1.6.0-beta"));
}

#[test]
fn test_check_catalog_accepts_valid_file() {
    let home = TempDir::new().unwrap();
    let file = home.path().join("catalog.toml");
    std::fs::write(
        &file,
        r#"
binary = "nihongo"
latest = "1.4.0"

[[release]]
version = "1.4.0"
os = "linux"
arch = "x86_64"
url = "https://example.test/nihongo-linux"
sha256 = "df5d67d1924e4291ff3857801b30a5e582270ebc6725cde6da1ba2300a63be31"
"#,
    )
    .unwrap();

    let output = pour(home.path(), &["check-catalog", file.to_str().unwrap()]);

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("1 release entries"));
}

#[test]
fn test_status_not_installed() {
    let home = TempDir::new().unwrap();
    let dest = home.path().join("bin");
    let output = pour(
        home.path(),
        &[
            "status",
            "--dest",
            dest.to_str().unwrap(),
            "--platform",
            "linux-x86_64",
        ],
    );

    assert_eq!(output.status.code(), Some(1));
    assert!(stdout(&output).contains("not installed"));
}

#[test]
fn test_uninstall_missing_binary_succeeds() {
    let home = TempDir::new().unwrap();
    let dest = home.path().join("bin");
    let output = pour(home.path(), &["uninstall", "--dest", dest.to_str().unwrap()]);

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("not installed"));
}

#[test]
fn test_invalid_settings_file_fails() {
    let home = TempDir::new().unwrap();
    std::fs::write(home.path().join("config.toml"), "[retry]\nmax_attempts = 0\n").unwrap();

    let output = pour(
        home.path(),
        &["resolve", "1.4.0", "--platform", "linux-x86_64"],
    );

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("max_attempts"));
}

/// Install a `tool` script printing `tool <version>` into `<home>/bin` and
/// write a catalog listing 1.5.3 with `digest`. Returns the catalog path.
#[cfg(unix)]
fn installed_tool(home: &Path, version: &str, digest: Option<&str>) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let bin = home.join("bin");
    std::fs::create_dir_all(&bin).unwrap();
    let script = format!("#!/bin/sh\necho \"tool {version}\"\n");
    let tool = bin.join("tool");
    std::fs::write(&tool, &script).unwrap();
    std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

    let digest = digest.map_or_else(|| sha256_hex(script.as_bytes()), str::to_string);
    let catalog = home.join("catalog.toml");
    std::fs::write(
        &catalog,
        format!(
            r#"
binary = "tool"

[[release]]
version = "1.5.3"
os = "linux"
arch = "x86_64"
url = "https://example.test/v1.5.3/tool-linux"
sha256 = "{digest}"
"#
        ),
    )
    .unwrap();
    catalog
}

#[cfg(unix)]
fn status(home: &Path, catalog: &Path) -> Output {
    pour(
        home,
        &[
            "status",
            "--dest",
            home.join("bin").to_str().unwrap(),
            "--catalog",
            catalog.to_str().unwrap(),
            "--platform",
            "linux-x86_64",
        ],
    )
}

#[cfg(unix)]
#[test]
fn test_status_intact_install_succeeds() {
    let home = TempDir::new().unwrap();
    let catalog = installed_tool(home.path(), "1.5.3", None);

    let output = status(home.path(), &catalog);

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let out = stdout(&output);
    assert!(out.contains("1.5.3"));
    assert!(out.contains("checksum verified"));
}

#[cfg(unix)]
#[test]
fn test_status_modified_install_exits_4() {
    let home = TempDir::new().unwrap();
    let catalog = installed_tool(home.path(), "1.5.3", Some(NIHONGO_LINUX_SHA256));

    let output = status(home.path(), &catalog);

    assert_eq!(output.status.code(), Some(4));
    assert!(stdout(&output).contains(NIHONGO_LINUX_SHA256));
}

#[cfg(unix)]
#[test]
fn test_status_version_missing_from_catalog_exits_2() {
    let home = TempDir::new().unwrap();
    let catalog = installed_tool(home.path(), "2.0.0", None);

    let output = status(home.path(), &catalog);

    assert_eq!(output.status.code(), Some(2));
    let out = stdout(&output);
    assert!(out.contains("2.0.0"));
    assert!(out.contains("does not list"));
}

#[test]
fn test_check_catalog_warns_when_empty() {
    let home = TempDir::new().unwrap();
    let file = home.path().join("catalog.toml");
    std::fs::write(&file, "binary = \"tool\"\n").unwrap();

    let output = pour(home.path(), &["check-catalog", file.to_str().unwrap()]);

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let out = stdout(&output);
    assert!(out.contains("0 release entries"));
    assert!(out.contains("no releases"));
}
