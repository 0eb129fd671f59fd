// Installer state machine tests
// All fetchers are fakes; every install goes into a temp directory


use pour::error::PourError;
use pour::installer::{InstallRequest, InstallStatus, Installer, Stage, VersionRequest};
use pour::lock::DestinationLock;
use std::fs;
use std::time::Duration;
use test_helpers::{
    BINARY, FakeFetcher, TestEnvironment, catalog_with, digest_of, linux_amd64, partial_files,
};
use tokio_util::sync::CancellationToken;

const URL: &str = "https://example.test/releases/download/v1.5.3/tool-linux";
const RELEASE: &[u8] = b"\x7fELF release 1.5.3";

fn request(env: &TestEnvironment, version: &str) -> InstallRequest {
    InstallRequest {
        version: VersionRequest::Exact(version.to_string()),
        platform: linux_amd64(),
        destination_dir: env.bin.clone(),
        force: false,
    }
}

fn installer(fetcher: FakeFetcher) -> Installer<FakeFetcher> {
    let catalog = catalog_with(&[("1.5.3", linux_amd64(), URL, digest_of(RELEASE))]);
    Installer::new(catalog, fetcher)
}

#[tokio::test]
async fn test_install_writes_fetched_bytes() {
    let env = TestEnvironment::new();
    let installer = installer(FakeFetcher::serving(RELEASE));

    let report = installer.install(&request(&env, "1.5.3")).await.unwrap();

    assert_eq!(report.status, InstallStatus::Installed);
    assert_eq!(report.binary.path, env.destination());
    assert_eq!(report.binary.version, "1.5.3");
    assert_eq!(report.url, URL);
    assert_eq!(report.fetch_attempts, 1);
    assert_eq!(
        report.stages,
        vec![
            Stage::Resolving,
            Stage::Fetching,
            Stage::Verifying,
            Stage::Publishing,
            Stage::Done
        ]
    );
    assert_eq!(fs::read(env.destination()).unwrap(), RELEASE);
    assert_eq!(installer.fetcher().calls(), 1);
    assert!(env.partial_files().is_empty());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(env.destination()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}

#[tokio::test]
async fn test_install_creates_missing_destination_directory() {
    let env = TestEnvironment::new();
    let installer = installer(FakeFetcher::serving(RELEASE));
    let nested = env.prefix.join("opt/tools/bin");

    let report = installer
        .install(&InstallRequest {
            destination_dir: nested.clone(),
            ..request(&env, "1.5.3")
        })
        .await
        .unwrap();

    assert_eq!(report.binary.path, nested.join(BINARY));
    assert_eq!(fs::read(nested.join(BINARY)).unwrap(), RELEASE);
}

#[tokio::test]
async fn test_unknown_version_fails_in_resolving_without_fetch() {
    let env = TestEnvironment::new();
    let installer = installer(FakeFetcher::serving(RELEASE));

    let err = installer.install(&request(&env, "9.9.9")).await.unwrap_err();

    assert_eq!(err.stage, Stage::Resolving);
    assert!(matches!(err.cause, PourError::Resolve(_)));
    assert_eq!(err.exit_code(), 2);
    assert_eq!(installer.fetcher().calls(), 0);
    assert!(!env.destination().exists());
}

#[tokio::test]
async fn test_unsupported_platform_fails_in_resolving() {
    let env = TestEnvironment::new();
    let installer = installer(FakeFetcher::serving(RELEASE));

    let err = installer
        .install(&InstallRequest {
            platform: "macos-arm64".parse().unwrap(),
            ..request(&env, "1.5.3")
        })
        .await
        .unwrap_err();

    assert_eq!(err.stage, Stage::Resolving);
    assert!(err.to_string().contains("no build for macos-aarch64"));
}

#[tokio::test]
async fn test_checksum_mismatch_leaves_no_install() {
    let env = TestEnvironment::new();
    let installer = installer(FakeFetcher::serving(b"tampered bytes"));

    let err = installer.install(&request(&env, "1.5.3")).await.unwrap_err();

    assert_eq!(err.stage, Stage::Verifying);
    match &err.cause {
        PourError::Checksum(mismatch) => {
            assert_eq!(mismatch.expected, digest_of(RELEASE).as_str());
            assert_eq!(mismatch.actual, digest_of(b"tampered bytes").as_str());
        }
        other => panic!("expected checksum mismatch, got {other:?}"),
    }
    assert_eq!(err.exit_code(), 4);
    assert!(!env.destination().exists());
    assert!(env.partial_files().is_empty());
}

#[tokio::test]
async fn test_checksum_mismatch_keeps_previous_install() {
    let env = TestEnvironment::new();
    fs::write(env.destination(), b"previous release").unwrap();
    let installer = installer(FakeFetcher::serving(b"tampered bytes"));

    let err = installer.install(&request(&env, "1.5.3")).await.unwrap_err();

    assert_eq!(err.stage, Stage::Verifying);
    assert_eq!(fs::read(env.destination()).unwrap(), b"previous release");
}

#[tokio::test]
async fn test_network_failure_is_reported_from_fetching() {
    let env = TestEnvironment::new();
    let installer = installer(FakeFetcher::failing("HTTP 404 Not Found"));

    let err = installer.install(&request(&env, "1.5.3")).await.unwrap_err();

    assert_eq!(err.stage, Stage::Fetching);
    assert!(matches!(err.cause, PourError::Network(_)));
    assert_eq!(err.exit_code(), 3);
    assert!(!env.destination().exists());
}

#[tokio::test]
async fn test_reinstall_same_version_does_not_fetch() {
    let env = TestEnvironment::new();
    let first = installer(FakeFetcher::serving(RELEASE));
    first.install(&request(&env, "1.5.3")).await.unwrap();

    let second = installer(FakeFetcher::serving(RELEASE));
    let report = second.install(&request(&env, "v1.5.3")).await.unwrap();

    assert_eq!(report.status, InstallStatus::AlreadyInstalled);
    assert_eq!(report.fetch_attempts, 0);
    assert_eq!(
        report.stages,
        vec![Stage::Resolving, Stage::Verifying, Stage::Done]
    );
    assert_eq!(second.fetcher().calls(), 0);
}

#[tokio::test]
async fn test_corrupted_install_is_replaced() {
    let env = TestEnvironment::new();
    fs::write(env.destination(), b"bit-rotted binary").unwrap();
    let installer = installer(FakeFetcher::serving(RELEASE));

    let report = installer.install(&request(&env, "1.5.3")).await.unwrap();

    assert_eq!(report.status, InstallStatus::Replaced);
    assert_eq!(installer.fetcher().calls(), 1);
    assert_eq!(fs::read(env.destination()).unwrap(), RELEASE);
}

#[cfg(unix)]
#[tokio::test]
async fn test_matching_but_unexecutable_install_is_replaced() {
    use std::os::unix::fs::PermissionsExt;

    let env = TestEnvironment::new();
    let installer = installer(FakeFetcher::serving(RELEASE));
    installer.install(&request(&env, "1.5.3")).await.unwrap();
    fs::set_permissions(env.destination(), fs::Permissions::from_mode(0o644)).unwrap();

    let report = installer.install(&request(&env, "1.5.3")).await.unwrap();

    assert_eq!(report.status, InstallStatus::Replaced);
    assert_eq!(installer.fetcher().calls(), 2);
    let mode = fs::metadata(env.destination()).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o755);
}

#[tokio::test]
async fn test_force_fetches_even_when_installed() {
    let env = TestEnvironment::new();
    fs::write(env.destination(), RELEASE).unwrap();
    let installer = installer(FakeFetcher::serving(RELEASE));

    let report = installer
        .install(&InstallRequest {
            force: true,
            ..request(&env, "1.5.3")
        })
        .await
        .unwrap();

    assert_eq!(report.status, InstallStatus::Replaced);
    assert_eq!(installer.fetcher().calls(), 1);
}

#[tokio::test]
async fn test_upgrade_overwrites_previous_version() {
    let env = TestEnvironment::new();
    let old = b"release 1.5.2".as_slice();
    let catalog = catalog_with(&[
        ("1.5.2", linux_amd64(), "https://example.test/v1.5.2/tool", digest_of(old)),
        ("1.5.3", linux_amd64(), URL, digest_of(RELEASE)),
    ]);

    Installer::new(catalog.clone(), FakeFetcher::serving(old))
        .install(&request(&env, "1.5.2"))
        .await
        .unwrap();
    let report = Installer::new(catalog, FakeFetcher::serving(RELEASE))
        .install(&request(&env, "1.5.3"))
        .await
        .unwrap();

    assert_eq!(report.status, InstallStatus::Replaced);
    assert_eq!(fs::read(env.destination()).unwrap(), RELEASE);
}

#[tokio::test]
async fn test_latest_follows_catalog_pointer() {
    let env = TestEnvironment::new();
    let mut catalog = catalog_with(&[
        ("1.5.2", linux_amd64(), "https://example.test/v1.5.2/tool", digest_of(b"old")),
        ("1.5.3", linux_amd64(), URL, digest_of(RELEASE)),
    ]);
    catalog
        .set_latest(pour::Channel::Stable, "1.5.3")
        .unwrap();
    let installer = Installer::new(catalog, FakeFetcher::serving(RELEASE));

    let report = installer
        .install(&InstallRequest {
            version: VersionRequest::parse("latest", false),
            ..request(&env, "")
        })
        .await
        .unwrap();

    assert_eq!(report.binary.version, "1.5.3");
}

#[tokio::test]
async fn test_cancel_during_fetch_leaves_nothing_behind() {
    let env = TestEnvironment::new();
    let cancel = CancellationToken::new();
    let installer = installer(FakeFetcher::hanging()).with_cancellation(cancel.clone());

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = tokio::time::timeout(
        Duration::from_secs(5),
        installer.install(&request(&env, "1.5.3")),
    )
    .await
    .expect("cancellation ends the install")
    .unwrap_err();

    assert_eq!(err.stage, Stage::Fetching);
    assert!(matches!(err.cause, PourError::Cancelled));
    assert_eq!(err.exit_code(), 130);
    assert!(!env.destination().exists());
    assert!(env.partial_files().is_empty());
}

#[tokio::test]
async fn test_cancel_before_rename_keeps_previous_install() {
    let env = TestEnvironment::new();
    fs::write(env.destination(), b"previous release").unwrap();
    let cancel = CancellationToken::new();
    let installer =
        installer(FakeFetcher::cancelling(cancel.clone(), RELEASE)).with_cancellation(cancel);

    let err = installer.install(&request(&env, "1.5.3")).await.unwrap_err();

    assert_eq!(err.stage, Stage::Publishing);
    assert!(matches!(err.cause, PourError::Cancelled));
    assert_eq!(fs::read(env.destination()).unwrap(), b"previous release");
    assert!(env.partial_files().is_empty());
}

#[tokio::test]
async fn test_cancel_while_waiting_for_destination_lock() {
    let env = TestEnvironment::new();
    let _held = DestinationLock::acquire(&env.destination(), &CancellationToken::new()).unwrap();
    let cancel = CancellationToken::new();
    let installer = installer(FakeFetcher::serving(RELEASE)).with_cancellation(cancel.clone());

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let err = tokio::time::timeout(
        Duration::from_secs(3),
        installer.install(&request(&env, "1.5.3")),
    )
    .await
    .expect("cancellation ends the wait for the lock")
    .unwrap_err();

    assert_eq!(err.stage, Stage::Publishing);
    assert!(matches!(err.cause, PourError::Cancelled));
    assert!(!env.destination().exists());
    assert!(env.partial_files().is_empty());
}

#[tokio::test]
async fn test_failed_rename_reports_publishing_and_cleans_up() {
    let env = TestEnvironment::new();
    // A non-empty directory in the way makes the rename fail
    fs::create_dir(env.destination()).unwrap();
    fs::write(env.destination().join("keep"), b"x").unwrap();
    let installer = installer(FakeFetcher::serving(RELEASE));

    let err = installer.install(&request(&env, "1.5.3")).await.unwrap_err();

    assert_eq!(err.stage, Stage::Publishing);
    assert!(matches!(err.cause, PourError::Filesystem(_)));
    assert_eq!(err.exit_code(), 5);
    assert!(env.destination().join("keep").exists());
    assert!(partial_files(&env.bin).is_empty());
}

#[tokio::test]
async fn test_concurrent_installs_leave_one_complete_binary() {
    let env = TestEnvironment::new();
    let a = b"release 1.5.2".as_slice();
    let catalog = catalog_with(&[
        ("1.5.2", linux_amd64(), "https://example.test/v1.5.2/tool", digest_of(a)),
        ("1.5.3", linux_amd64(), URL, digest_of(RELEASE)),
    ]);
    let first = Installer::new(catalog.clone(), FakeFetcher::serving(a));
    let second = Installer::new(catalog, FakeFetcher::serving(RELEASE));
    let req_a = request(&env, "1.5.2");
    let req_b = request(&env, "1.5.3");

    let (ra, rb) = tokio::join!(first.install(&req_a), second.install(&req_b));
    ra.unwrap();
    rb.unwrap();

    let installed = fs::read(env.destination()).unwrap();
    assert!(installed == a || installed == RELEASE);
    assert!(env.partial_files().is_empty());
}

#[tokio::test]
async fn test_uninstall_removes_binary() {
    let env = TestEnvironment::new();
    let installer = installer(FakeFetcher::serving(RELEASE));
    installer.install(&request(&env, "1.5.3")).await.unwrap();

    let removed = installer.uninstall(&env.bin).await.unwrap();
    assert_eq!(removed, Some(env.destination()));
    assert!(!env.destination().exists());

    assert_eq!(installer.uninstall(&env.bin).await.unwrap(), None);
}
