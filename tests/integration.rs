use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn wsd_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("wsd");
    path
}

fn snapshot_json() -> String {
    let mut messages = Vec::new();
    for i in 0..40 {
        messages.push(format!(
            r#"{{
                "id": "c2-m{i}",
                "author_id": "U1",
                "text": "status update number {i} covering deploys, reviews, and follow-ups",
                "timestamp": "2025-06-01T{:02}:{:02}:00Z"
            }}"#,
            9 + (i / 60),
            i % 60,
            i = i
        ));
    }
    format!(
        r#"{{
        "workspace_id": "T0TEST",
        "name": "Acme",
        "domain": "acme",
        "extracted_at": "2025-06-10T00:00:00Z",
        "users": [
            {{"id": "U1", "display_name": "Alice", "is_admin": true}},
            {{"id": "U2", "display_name": "Bob"}}
        ],
        "channels": [
            {{
                "id": "C1",
                "name": "general",
                "created_at": "2025-01-01T00:00:00Z",
                "messages": [
                    {{"id": "m1", "author_id": "U1", "text": "kickoff is today", "timestamp": "2025-06-01T09:00:00Z"}},
                    {{"id": "m2", "author_id": "U2", "text": "joining in five", "timestamp": "2025-06-01T09:02:00Z", "thread_root_id": "m1"}},
                    {{"id": "m3", "author_id": "U1", "text": "notes are posted", "timestamp": "2025-06-02T10:00:00Z"}},
                    {{"id": "m4", "author_id": "U2", "text": "reviewing now", "timestamp": "2025-06-02T10:30:00Z"}},
                    {{"id": "m5", "author_id": "U9", "text": "who has the doc link?", "timestamp": "2025-06-03T08:00:00Z"}}
                ]
            }},
            {{
                "id": "C2",
                "name": "dev",
                "created_at": "2025-01-01T00:00:00Z",
                "messages": [{}]
            }}
        ],
        "canvases": [
            {{
                "id": "K1",
                "title": "Roadmap",
                "created_at": "2025-03-01T00:00:00Z",
                "creator_id": "U1",
                "channel_id": "C1",
                "blocks": [
                    {{"text": "Q3 goals"}},
                    {{"rich_text": [{{"text": "ship v2"}}, {{"text": "hire two engineers"}}]}}
                ]
            }}
        ]
    }}"#,
        messages.join(",")
    )
}

fn setup_test_env() -> (TempDir, PathBuf, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let data_dir = root.join("data");
    fs::create_dir_all(&data_dir).unwrap();

    let snapshot_path = root.join("acme.json");
    fs::write(&snapshot_path, snapshot_json()).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/wsd.sqlite"

[chunking]
max_chars = 400

[summarizer]
provider = "naive"

[worker]
pool_size = 2
task_concurrency = 2

[server]
bind = "127.0.0.1:7400"
"#,
        root.display()
    );

    let config_path = config_dir.join("wsd.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path, snapshot_path)
}

fn run_wsd(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = wsd_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run wsd binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path, _) = setup_test_env();

    let (stdout, stderr, success) = run_wsd(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path, _) = setup_test_env();

    let (_, _, success1) = run_wsd(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_wsd(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_import_registers_workspace() {
    let (_tmp, config_path, snapshot_path) = setup_test_env();

    run_wsd(&config_path, &["init"]);
    let (stdout, stderr, success) =
        run_wsd(&config_path, &["import", snapshot_path.to_str().unwrap()]);
    assert!(success, "import failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("import T0TEST"));
    assert!(stdout.contains("channels: 2"));
    assert!(stdout.contains("canvases: 1"));
    assert!(stdout.contains("ok"));

    let (stdout, _, success) = run_wsd(&config_path, &["workspaces"]);
    assert!(success);
    assert!(stdout.contains("T0TEST"));
    assert!(stdout.contains("acme"));
}

#[test]
fn test_reimport_unchanged_is_skipped() {
    let (_tmp, config_path, snapshot_path) = setup_test_env();

    run_wsd(&config_path, &["init"]);
    run_wsd(&config_path, &["import", snapshot_path.to_str().unwrap()]);
    let (stdout, _, success) =
        run_wsd(&config_path, &["import", snapshot_path.to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains("unchanged, skipped"));
}

#[test]
fn test_process_produces_summary() {
    let (_tmp, config_path, snapshot_path) = setup_test_env();

    run_wsd(&config_path, &["init"]);
    run_wsd(&config_path, &["import", snapshot_path.to_str().unwrap()]);

    let (stdout, stderr, success) = run_wsd(
        &config_path,
        &["process", "T0TEST", "--progress", "off"],
    );
    assert!(
        success,
        "process failed: stdout={}, stderr={}",
        stdout, stderr
    );
    assert!(stdout.contains("channels summarized: 2"));
    assert!(stdout.contains("canvases summarized: 1"));
    assert!(stdout.contains("WORKSPACE SUMMARY"));
    assert!(stdout.contains("TOPICS"));
    assert!(stdout.trim_end().ends_with("ok"));
}

#[test]
fn test_process_with_channel_filter() {
    let (_tmp, config_path, snapshot_path) = setup_test_env();

    run_wsd(&config_path, &["init"]);
    run_wsd(&config_path, &["import", snapshot_path.to_str().unwrap()]);

    let (stdout, stderr, success) = run_wsd(
        &config_path,
        &[
            "process",
            "T0TEST",
            "--channel",
            "C1",
            "--no-canvases",
            "--progress",
            "off",
        ],
    );
    assert!(
        success,
        "process failed: stdout={}, stderr={}",
        stdout, stderr
    );
    assert!(stdout.contains("channels summarized: 1"));
    assert!(stdout.contains("canvases summarized: 0"));
}

#[test]
fn test_process_unknown_workspace_fails() {
    let (_tmp, config_path, _) = setup_test_env();

    run_wsd(&config_path, &["init"]);
    let (_, stderr, success) = run_wsd(
        &config_path,
        &["process", "T0MISSING", "--progress", "off"],
    );
    assert!(!success);
    assert!(stderr.contains("not imported"));
}

#[test]
fn test_import_rejects_malformed_export() {
    let (_tmp, config_path, _) = setup_test_env();
    let bad = _tmp.path().join("bad.json");
    fs::write(&bad, "{\"workspace_id\": \"W1\"").unwrap();

    run_wsd(&config_path, &["init"]);
    let (_, stderr, success) = run_wsd(&config_path, &["import", bad.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("parse"));
}
