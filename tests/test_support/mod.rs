#![allow(dead_code)]

use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
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

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_coursesyncd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .env_remove("COURSESYNC_ENV")
        .env_remove("COURSESYNC_FLAG_NAME")
        .spawn()
        .expect("spawn coursesyncd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
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
    let value: Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or(Value::Null)
}

pub fn error_code(resp: &Value) -> Option<&str> {
    resp.get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

pub fn admin() -> Value {
    json!({ "userId": "root", "role": "admin" })
}

/// Opens a fresh workspace with schools s1/s2, teachers t1 (s1) and t2 (s2),
/// school admin sa1 (s1) and classes k1 (s1), k9 (s2). `flattened` sets the
/// schema gate for the default environment.
pub fn seed_workspace(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    prefix: &str,
    flattened: bool,
) -> PathBuf {
    let workspace = temp_dir(prefix);
    request_ok(
        stdin,
        reader,
        "seed-ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        stdin,
        reader,
        "seed-gate",
        "flags.set",
        json!({ "caller": admin(), "enabled": flattened }),
    );
    for (i, (school, name)) in [("s1", "North"), ("s2", "South")].iter().enumerate() {
        request_ok(
            stdin,
            reader,
            &format!("seed-school-{}", i),
            "directory.schoolUpsert",
            json!({ "caller": admin(), "schoolId": school, "name": name }),
        );
    }
    for (i, (teacher, school)) in [("t1", "s1"), ("t2", "s2")].iter().enumerate() {
        request_ok(
            stdin,
            reader,
            &format!("seed-teacher-{}", i),
            "directory.teacherLink",
            json!({ "caller": admin(), "teacherId": teacher, "schoolId": school }),
        );
    }
    request_ok(
        stdin,
        reader,
        "seed-sa",
        "directory.schoolAdminAssign",
        json!({ "caller": admin(), "userId": "sa1", "schoolId": "s1" }),
    );
    for (i, (class, school)) in [("k1", "s1"), ("k9", "s2")].iter().enumerate() {
        request_ok(
            stdin,
            reader,
            &format!("seed-class-{}", i),
            "directory.classUpsert",
            json!({ "caller": admin(), "classId": class, "schoolId": school, "name": class }),
        );
    }
    workspace
}
