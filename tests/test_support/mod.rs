#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

/// Monday; most fixtures build a term around this week.
pub const DEFAULT_TODAY: &str = "2024-03-04";

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
    spawn_sidecar_on(DEFAULT_TODAY)
}

pub fn spawn_sidecar_on(today: &str) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_lunchd");
    let mut child = Command::new(exe)
        .env("LUNCHD_TODAY", today)
        .env_remove("LUNCHD_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn lunchd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn request(
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

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or(serde_json::Value::Null)
}

/// Returns the error code of a request that must fail.
pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .pointer("/error/code")
        .and_then(|v| v.as_str())
        .expect("error code")
        .to_string()
}

pub fn admin() -> serde_json::Value {
    json!({ "userId": "admin-1", "role": "ADMIN" })
}

pub fn school_admin(school_id: &str) -> serde_json::Value {
    json!({ "userId": "staff-1", "role": "SCHOOLADMIN", "schoolId": school_id })
}

pub fn parent(user_id: &str) -> serde_json::Value {
    json!({ "userId": user_id, "role": "USER" })
}

/// Copies `identity` into a params object.
pub fn with_identity(identity: &serde_json::Value, params: serde_json::Value) -> serde_json::Value {
    let mut params = params;
    params["identity"] = identity.clone();
    params
}

pub fn str_field(value: &serde_json::Value, key: &str) -> String {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, value))
        .to_string()
}

pub fn str_array(value: &serde_json::Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(|v| v.as_array())
        .unwrap_or_else(|| panic!("missing {} in {}", key, value))
        .iter()
        .map(|v| v.as_str().expect("string").to_string())
        .collect()
}

/// Ids of a seeded school with one classroom, one claimed pupil and a
/// two-group menu.
pub struct Fixture {
    pub school_id: String,
    pub classroom_id: String,
    pub pupil_id: String,
    pub parent: serde_json::Value,
    pub sandwich_group: String,
    pub ham: String,
    pub cheese: String,
    pub snack_group: String,
    pub apple: String,
    pub yogurt: String,
}

/// Opens `workspace` and seeds it through the public methods. The term runs
/// through March 2024 with a one-day holiday on Wednesday the 13th.
pub fn seed_fixture(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
) -> Fixture {
    let admin = admin();
    request_ok(stdin, reader, "seed-ws", "workspace.select", json!({ "path": workspace.to_string_lossy() }));
    let school = request_ok(
        stdin,
        reader,
        "seed-school",
        "schools.create",
        with_identity(&admin, json!({ "name": "North Primary" })),
    );
    let school_id = str_field(&school, "schoolId");
    let classroom = request_ok(
        stdin,
        reader,
        "seed-class",
        "classrooms.create",
        with_identity(&admin, json!({ "schoolId": school_id, "name": "1A" })),
    );
    let classroom_id = str_field(&classroom, "classroomId");
    let codes = request_ok(
        stdin,
        reader,
        "seed-pupils",
        "classrooms.addUnregisteredPupils",
        with_identity(&admin, json!({ "classroomId": classroom_id, "count": 1 })),
    );
    let pupil_id = str_array(&codes, "codes").remove(0);
    let parent = parent("parent-1");
    request_ok(
        stdin,
        reader,
        "seed-claim",
        "pupils.claim",
        with_identity(&parent, json!({ "codes": [pupil_id] })),
    );

    request_ok(
        stdin,
        reader,
        "seed-term",
        "schedules.create",
        with_identity(
            &admin,
            json!({ "schoolId": school_id, "name": "Spring", "kind": "TERM",
                    "startDate": "2024-03-01", "endDate": "2024-03-29" }),
        ),
    );
    request_ok(
        stdin,
        reader,
        "seed-holiday",
        "schedules.create",
        with_identity(
            &admin,
            json!({ "schoolId": school_id, "name": "Training day", "kind": "HOLIDAY",
                    "startDate": "2024-03-13", "endDate": "2024-03-13" }),
        ),
    );

    let group = |stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, id: &str, name: &str, max: i64| {
        let g = request_ok(
            stdin,
            reader,
            id,
            "meals.groups.create",
            with_identity(&admin, json!({ "name": name, "maxSelections": max })),
        );
        str_field(&g, "groupId")
    };
    let choice = |stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, id: &str, group_id: &str, name: &str| {
        let c = request_ok(
            stdin,
            reader,
            id,
            "meals.choices.create",
            with_identity(&admin, json!({ "groupId": group_id, "name": name })),
        );
        str_field(&c, "choiceId")
    };
    let sandwich_group = group(stdin, reader, "seed-g1", "Sandwich", 1);
    let snack_group = group(stdin, reader, "seed-g2", "Snack", 2);
    let ham = choice(stdin, reader, "seed-c1", &sandwich_group, "Ham");
    let cheese = choice(stdin, reader, "seed-c2", &sandwich_group, "Cheese");
    let apple = choice(stdin, reader, "seed-c3", &snack_group, "Apple");
    let yogurt = choice(stdin, reader, "seed-c4", &snack_group, "Yogurt");

    Fixture {
        school_id,
        classroom_id,
        pupil_id,
        parent,
        sandwich_group,
        ham,
        cheese,
        snack_group,
        apple,
        yogurt,
    }
}
