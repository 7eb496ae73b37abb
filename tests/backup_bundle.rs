use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_lmsd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn lmsd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn export_then_import_into_fresh_workspace() {
    let source_ws = temp_dir("lmsd-backup-src");
    let target_ws = temp_dir("lmsd-backup-dst");
    let bundle_path = temp_dir("lmsd-backup-out").join("workspace.lmsbundle");

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": source_ws.to_string_lossy() }),
    );
    request_ok(&mut stdin, &mut reader, "2", "badges.seedDefaults", json!({}));
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "courses.create",
        json!({ "title": "Archived Course" }),
    );

    let export = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "backup.exportWorkspaceBundle",
        json!({ "outPath": bundle_path.to_string_lossy() }),
    );
    assert_eq!(
        export.get("bundleFormat").and_then(|v| v.as_str()),
        Some("lms-workspace-v1")
    );
    assert!(bundle_path.is_file(), "bundle file written");

    let import = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "backup.importWorkspaceBundle",
        json!({
            "inPath": bundle_path.to_string_lossy(),
            "workspacePath": target_ws.to_string_lossy()
        }),
    );
    assert_eq!(
        import.get("bundleFormatDetected").and_then(|v| v.as_str()),
        Some("lms-workspace-v1")
    );

    // The imported workspace is now active and holds the exported data.
    let courses = request_ok(&mut stdin, &mut reader, "6", "courses.list", json!({}));
    let titles: Vec<&str> = courses
        .get("courses")
        .and_then(|v| v.as_array())
        .expect("courses")
        .iter()
        .filter_map(|c| c.get("title").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(titles, vec!["Archived Course"]);

    let badges = request_ok(&mut stdin, &mut reader, "7", "badges.list", json!({}));
    assert_eq!(
        badges.get("badges").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(8)
    );
}

#[test]
fn corrupted_bundle_is_rejected() {
    let source_ws = temp_dir("lmsd-backup-corrupt-src");
    let bundle_path = temp_dir("lmsd-backup-corrupt").join("workspace.lmsbundle");

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": source_ws.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "backup.exportWorkspaceBundle",
        json!({ "outPath": bundle_path.to_string_lossy() }),
    );

    // Truncate the archive so it no longer parses.
    let bytes = std::fs::read(&bundle_path).expect("read bundle");
    std::fs::write(&bundle_path, &bytes[..bytes.len() / 2]).expect("truncate bundle");

    let resp = request(
        &mut stdin,
        &mut reader,
        "3",
        "backup.importWorkspaceBundle",
        json!({ "inPath": bundle_path.to_string_lossy() }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        resp.pointer("/error/code").and_then(|v| v.as_str()),
        Some("io_failed")
    );
}
