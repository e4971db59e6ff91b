//! Binary-level tests for the network-free command paths.
//!
//! Each test points `HOME` at a private temp directory so the profile
//! under `~/.twigga/config.json` is isolated per test.

use assert_cmd::Command;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use predicates::prelude::*;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use tempfile::TempDir;

fn twigga(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("twigga").expect("binary exists");
    cmd.env("HOME", home.path());
    cmd.env("USERPROFILE", home.path());
    cmd
}

fn config_path(home: &TempDir) -> PathBuf {
    home.path().join(".twigga").join("config.json")
}

fn write_profile(home: &TempDir, status: bool, token: &str, project_id: &str) {
    write_profile_with_base(home, status, token, project_id, "https://twiga.bongocloud.co.tz");
}

fn write_profile_with_base(
    home: &TempDir,
    status: bool,
    token: &str,
    project_id: &str,
    base_url: &str,
) {
    let path = config_path(home);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let profile = serde_json::json!({
        "status": status,
        "baseURL": base_url,
        "accountBaseURL": "https://account.bongocloud.co.tz",
        "projectId": project_id,
        "token": token,
    });
    fs::write(&path, serde_json::to_vec_pretty(&profile).unwrap()).unwrap();
}

/// A loopback stand-in for the hosting API: uploads succeed, pointing
/// the channel fails with a server error.
fn spawn_broken_promote_service() -> SocketAddr {
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async move {
            let app = Router::new()
                .route(
                    "/hosting/{bucket}/{site}/{version}/upload",
                    post(|| async { Json(serde_json::json!({ "status": "ok" })) }),
                )
                .route(
                    "/hosting/{bucket}/{site}/channels/{channel}",
                    post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "channel store down") }),
                );
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            tx.send(listener.local_addr().unwrap()).unwrap();
            axum::serve(listener, app).await.unwrap();
        });
    });
    rx.recv().unwrap()
}

#[test]
fn help_lists_all_verbs() {
    let home = TempDir::new().unwrap();
    twigga(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("login")
                .and(predicate::str::contains("logout"))
                .and(predicate::str::contains("projects"))
                .and(predicate::str::contains("bucket"))
                .and(predicate::str::contains("storage"))
                .and(predicate::str::contains("deploy")),
        );
}

#[test]
fn unknown_verb_fails() {
    let home = TempDir::new().unwrap();
    twigga(&home).arg("frobnicate").assert().failure();
}

#[test]
fn projects_without_login_prints_guidance_and_exits_zero() {
    let home = TempDir::new().unwrap();
    twigga(&home)
        .arg("projects")
        .assert()
        .success()
        .stdout(predicate::str::contains("twigga login"));
}

#[test]
fn project_without_login_prints_guidance() {
    let home = TempDir::new().unwrap();
    twigga(&home)
        .arg("project")
        .assert()
        .success()
        .stdout(predicate::str::contains("twigga login"));
}

#[test]
fn project_prints_the_active_project() {
    let home = TempDir::new().unwrap();
    write_profile(&home, true, "sess", "proj42");
    twigga(&home)
        .arg("project")
        .assert()
        .success()
        .stdout(predicate::str::contains("proj42"));
}

#[test]
fn login_when_already_logged_in_is_a_no_op() {
    let home = TempDir::new().unwrap();
    write_profile(&home, true, "sess", "");
    twigga(&home)
        .arg("login")
        .assert()
        .success()
        .stdout(predicate::str::contains("Already logged in"));
}

#[test]
fn logout_clears_the_persisted_session() {
    let home = TempDir::new().unwrap();
    write_profile(&home, true, "sess", "proj1");

    twigga(&home)
        .arg("logout")
        .assert()
        .success()
        .stdout(predicate::str::contains("Logged out"));

    let raw = fs::read_to_string(config_path(&home)).unwrap();
    let profile: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(profile["status"], false);
    assert_eq!(profile["token"], "");
    assert_eq!(profile["projectId"], "");
}

#[test]
fn deploy_without_active_project_prints_guidance() {
    let home = TempDir::new().unwrap();
    write_profile(&home, true, "sess", "");

    let site = TempDir::new().unwrap();
    fs::write(site.path().join("index.html"), "<h1>hi</h1>").unwrap();

    twigga(&home)
        .arg("deploy")
        .arg(site.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("No active project"));
}

#[test]
fn deploy_lists_uploads_even_when_promote_fails() {
    let addr = spawn_broken_promote_service();
    let home = TempDir::new().unwrap();
    write_profile_with_base(&home, true, "sess", "proj1", &format!("http://{addr}"));

    let site = TempDir::new().unwrap();
    fs::write(site.path().join("index.html"), "<h1>hi</h1>").unwrap();

    twigga(&home)
        .arg("deploy")
        .arg(site.path())
        .assert()
        .failure()
        .stdout(predicate::str::contains(" - index.html"))
        .stderr(predicate::str::contains("failed to point main channel"));
}

#[test]
fn deploy_without_login_prints_guidance() {
    let home = TempDir::new().unwrap();
    let site = TempDir::new().unwrap();

    twigga(&home)
        .arg("deploy")
        .arg(site.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("twigga login"));
}
