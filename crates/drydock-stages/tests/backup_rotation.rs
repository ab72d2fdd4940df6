//! Backup rotation against a real filesystem through the local
//! channel. Exercises the rotation script itself: staging, generation
//! renames, the up-to-date guard, and the two-generation bound.

use std::fs;
use std::path::Path;
use std::time::Duration;

use drydock_channel::{LocalChannel, PollConfig};
use drydock_core::{DeploymentRequest, Environment, StageOutcome};
use drydock_stages::rotate_and_backup;

fn request(root: &Path, app: &Path) -> DeploymentRequest {
    DeploymentRequest {
        environment: Environment::Development,
        host: "local".into(),
        revision: "main".into(),
        executable: "python3".into(),
        entry_point: "app.py".into(),
        install_root: root.display().to_string(),
        working_dir: app.display().to_string(),
        manifest_path: "requirements.txt".into(),
        health_endpoint: "http://localhost:0/status".into(),
    }
}

fn poll() -> PollConfig {
    PollConfig {
        base_interval: Duration::from_millis(5),
        max_interval: Duration::from_millis(20),
    }
}

fn generation_count(root: &Path) -> usize {
    ["current", "previous"]
        .iter()
        .filter(|g| root.join(g).is_dir())
        .count()
}

#[tokio::test]
async fn rotation_is_idempotent_and_bounded_to_two_generations() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("releases");
    let app = dir.path().join("live");
    fs::create_dir_all(&app).unwrap();
    fs::write(app.join("app.py"), "print('v1')\n").unwrap();
    fs::write(app.join("requirements.txt"), "flask\n").unwrap();

    let channel = LocalChannel::new(Duration::from_secs(10));
    let req = request(&root, &app);
    let deadline = Duration::from_secs(10);

    // First rotation captures the live tree.
    let (result, snapshot) = rotate_and_backup(&channel, &req, deadline, &poll()).await;
    assert_eq!(result.outcome, StageOutcome::Ok, "stderr: {}", result.stderr);
    assert!(snapshot.unwrap().file_count.unwrap() >= 2);
    assert!(root.join("current/app.py").is_file());
    assert!(!root.join("previous").exists());

    // Second rotation without an intervening deployment: up to date,
    // the (absent) older generation is not manufactured or destroyed.
    let (result, snapshot) = rotate_and_backup(&channel, &req, deadline, &poll()).await;
    assert_eq!(result.outcome, StageOutcome::Ok);
    assert!(result.stdout.contains("up to date"));
    assert!(snapshot.unwrap().file_count.is_none());
    assert!(!root.join("previous").exists());

    // Simulate a deployment changing the live tree, then rotate again.
    fs::write(app.join("app.py"), "print('v2')\n").unwrap();
    let (result, _) = rotate_and_backup(&channel, &req, deadline, &poll()).await;
    assert_eq!(result.outcome, StageOutcome::Ok);
    assert!(result.stdout.contains("snapshot created"));
    assert_eq!(generation_count(&root), 2);
    assert_eq!(
        fs::read_to_string(root.join("previous/app.py")).unwrap(),
        "print('v1')\n"
    );
    assert_eq!(
        fs::read_to_string(root.join("current/app.py")).unwrap(),
        "print('v2')\n"
    );

    // Never more than two generations, no stray staging directories.
    fs::write(app.join("app.py"), "print('v3')\n").unwrap();
    let (result, _) = rotate_and_backup(&channel, &req, deadline, &poll()).await;
    assert_eq!(result.outcome, StageOutcome::Ok);
    assert_eq!(generation_count(&root), 2);
    let stray: Vec<_> = fs::read_dir(&root)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            let name = e.file_name();
            name != "current" && name != "previous"
        })
        .collect();
    assert!(stray.is_empty(), "unexpected entries: {stray:?}");
}

#[tokio::test]
async fn missing_working_tree_reports_no_prior_version() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("releases");
    let app = dir.path().join("live"); // never created

    let channel = LocalChannel::new(Duration::from_secs(10));
    let req = request(&root, &app);

    let (result, snapshot) =
        rotate_and_backup(&channel, &req, Duration::from_secs(10), &poll()).await;
    match &result.outcome {
        StageOutcome::SoftFail { warning } => assert!(warning.contains("no prior version")),
        other => panic!("expected soft fail, got {other:?}"),
    }
    assert!(snapshot.is_none());
    assert!(!root.join("current").exists());
}

#[tokio::test]
async fn dependency_install_is_not_captured() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("releases");
    let app = dir.path().join("live");
    fs::create_dir_all(app.join(".venv/lib")).unwrap();
    fs::write(app.join(".venv/lib/big.so"), "binary").unwrap();
    fs::write(app.join("app.py"), "print('v1')\n").unwrap();

    let channel = LocalChannel::new(Duration::from_secs(10));
    let req = request(&root, &app);

    let (result, _) = rotate_and_backup(&channel, &req, Duration::from_secs(10), &poll()).await;
    assert_eq!(result.outcome, StageOutcome::Ok, "stderr: {}", result.stderr);
    assert!(root.join("current/app.py").is_file());
    assert!(!root.join("current/.venv").exists());
}
