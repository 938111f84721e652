//! End-to-end runs of `worqloctl configure` against a throwaway deploy root.

use std::fs;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use worqloctl::env_store::parse_env_contents;

#[test]
fn configure_creates_env_and_prints_summary() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut cmd = cargo_bin_cmd!("worqloctl");
    cmd.arg("--deploy-root")
        .arg(dir.path())
        .args(["configure", "http://192.168.0.5", "--llm-provider", "openai"])
        .env("RUST_LOG", "warn")
        .assert()
        .success()
        .stdout(predicate::str::contains("http://192.168.0.5/api"));

    let raw = fs::read_to_string(dir.path().join(".env")).expect("read env");
    let env = parse_env_contents(&raw);
    assert_eq!(env["API_URL"], "http://192.168.0.5/api");
    assert_eq!(env["WS_URL"], "ws://192.168.0.5/ws");
    assert_eq!(
        env["HUBSPOT_REDIRECT_URI"],
        "http://192.168.0.5/integrations/hubspot/callback"
    );
    assert_eq!(env["LLM_PROVIDER"], "openai");
}

#[test]
fn configure_twice_leaves_file_identical() {
    let dir = tempfile::tempdir().expect("tempdir");
    let env_path = dir.path().join(".env");
    fs::write(&env_path, "# managed by hand\nSECRET=x=y&z?\n").expect("seed");

    for _ in 0..2 {
        cargo_bin_cmd!("worqloctl")
            .arg("--deploy-root")
            .arg(dir.path())
            .args(["configure", "https://app.example.com:8443/"])
            .assert()
            .success();
    }
    let first = fs::read_to_string(&env_path).expect("read");
    cargo_bin_cmd!("worqloctl")
        .arg("--deploy-root")
        .arg(dir.path())
        .args(["configure", "https://app.example.com:8443"])
        .assert()
        .success();
    let second = fs::read_to_string(&env_path).expect("read");
    assert_eq!(first, second);
    assert!(second.starts_with("# managed by hand\nSECRET=x=y&z?\n"));
    assert_eq!(second.matches("API_URL=").count(), 1);
}

#[test]
fn configure_rejects_invalid_port() {
    let dir = tempfile::tempdir().expect("tempdir");
    cargo_bin_cmd!("worqloctl")
        .arg("--deploy-root")
        .arg(dir.path())
        .args(["configure", "example.com:0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid access point"));
    assert!(!dir.path().join(".env").exists());
}

#[test]
fn overlays_lists_present_files_in_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    for f in [
        "docker-compose.yml",
        "docker-compose.observability.yml",
        "docker-compose.prebuilt.yml",
    ] {
        fs::write(dir.path().join(f), "").expect("write");
    }
    cargo_bin_cmd!("worqloctl")
        .arg("--deploy-root")
        .arg(dir.path())
        .args([
            "overlays",
            "--observability",
            "--prebuilt",
            "--arch-fallback",
            "off",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "base > observability > prebuilt",
        ));
}

#[test]
fn relative_env_file_lands_under_deploy_root() {
    let dir = tempfile::tempdir().expect("tempdir");
    let elsewhere = tempfile::tempdir().expect("cwd");
    cargo_bin_cmd!("worqloctl")
        .current_dir(elsewhere.path())
        .arg("--deploy-root")
        .arg(dir.path())
        .args(["--env-file", "config/prod.env", "configure", "localhost"])
        .assert()
        .success();
    assert!(dir.path().join("config/prod.env").is_file());
    assert!(!elsewhere.path().join("config/prod.env").exists());
}

#[test]
fn overlays_follow_saved_observability_unless_overridden() {
    let dir = tempfile::tempdir().expect("tempdir");
    for f in ["docker-compose.yml", "docker-compose.observability.yml"] {
        fs::write(dir.path().join(f), "").expect("write");
    }
    fs::write(dir.path().join(".env"), "OBSERVABILITY_ENABLED=true\n")
        .expect("env");

    cargo_bin_cmd!("worqloctl")
        .arg("--deploy-root")
        .arg(dir.path())
        .args(["overlays", "--arch-fallback", "off"])
        .assert()
        .success()
        .stdout(predicate::str::contains("base > observability"));

    cargo_bin_cmd!("worqloctl")
        .arg("--deploy-root")
        .arg(dir.path())
        .args(["overlays", "--observability=false", "--arch-fallback", "off"])
        .assert()
        .success()
        .stdout(predicate::str::contains("observability").not());
}

#[test]
fn configure_points_proxy_at_plain_profile() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(
        dir.path().join(".env"),
        "SSL_ENABLED=true\nSSL_DOMAIN=app.example.com\nOBSERVABILITY_ENABLED=true\n",
    )
    .expect("env");

    cargo_bin_cmd!("worqloctl")
        .arg("--deploy-root")
        .arg(dir.path())
        .args(["configure", "http://192.168.0.5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("./nginx/nginx.observability.conf"));

    let raw = fs::read_to_string(dir.path().join(".env")).expect("read env");
    let env = parse_env_contents(&raw);
    assert_eq!(env["NGINX_CONFIG"], "./nginx/nginx.observability.conf");
    assert_eq!(env["SSL_ENABLED"], "false");
    assert_eq!(env["OBSERVABILITY_ENABLED"], "true");
}
