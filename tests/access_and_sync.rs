mod test_support;

use serde_json::{json, Value};
use test_support::{admin, error_code, request, request_ok, seed_workspace, spawn_sidecar};

fn lesson_envelope(key: &str, course: &str, day: u32) -> Value {
    json!({
        "action": "upserted",
        "naturalKey": key,
        "entity": "lesson",
        "payload": {
            "courseId": course,
            "teacherId": "t1",
            "name": format!("Lesson {}", key),
            "startTime": format!("2024-03-{:02}T09:00:00Z", day),
            "endTime": format!("2024-03-{:02}T10:00:00Z", day),
        }
    })
}

#[test]
fn school_scoped_callers_cannot_cross_schools() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let workspace = seed_workspace(&mut stdin, &mut reader, "coursesync-access", true);

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "courses.upsert",
        json!({ "caller": admin(), "course": { "id": "south", "schoolId": "s2", "name": "Chemistry" } }),
    );

    let sa = json!({ "userId": "sa1", "role": "schoolAdmin" });
    let denied = request(
        &mut stdin,
        &mut reader,
        "2",
        "courses.delete",
        json!({ "caller": sa, "courseId": "south" }),
    );
    assert_eq!(error_code(&denied), Some("permission_denied"));
    request_ok(&mut stdin, &mut reader, "3", "courses.get", json!({ "courseId": "south" }));

    let cross_class = request(
        &mut stdin,
        &mut reader,
        "4",
        "courses.upsert",
        json!({
            "caller": sa,
            "course": { "id": "north", "schoolId": "s1", "name": "Biology", "classIds": ["k9"] }
        }),
    );
    assert_eq!(error_code(&cross_class), Some("permission_denied"));

    let teacher = json!({ "userId": "t1", "role": "teacher" });
    let foreign_lesson = request(
        &mut stdin,
        &mut reader,
        "5",
        "lessons.createLive",
        json!({
            "caller": teacher,
            "lessons": [{
                "courseId": "south",
                "teacherId": "t1",
                "name": "Acids",
                "startTime": "2024-01-10T00:00:00Z",
                "endTime": "2024-01-10T02:00:00Z"
            }]
        }),
    );
    assert_eq!(error_code(&foreign_lesson), Some("permission_denied"));

    let anonymous = request(
        &mut stdin,
        &mut reader,
        "6",
        "courses.delete",
        json!({ "courseId": "south" }),
    );
    assert_eq!(error_code(&anonymous), Some("permission_denied"));

    let missing = request(
        &mut stdin,
        &mut reader,
        "7",
        "courses.delete",
        json!({ "caller": admin(), "courseId": "ghost" }),
    );
    assert_eq!(error_code(&missing), Some("not_found"));

    let backwards = request(
        &mut stdin,
        &mut reader,
        "8",
        "lessons.createLive",
        json!({
            "caller": admin(),
            "lessons": [{
                "courseId": "south",
                "teacherId": "t2",
                "name": "Bases",
                "startTime": "2024-01-10T02:00:00Z",
                "endTime": "2024-01-10T00:00:00Z"
            }]
        }),
    );
    assert_eq!(error_code(&backwards), Some("bad_params"));

    let _ = std::fs::remove_dir_all(&workspace);
}

#[test]
fn sync_batch_isolates_failures_and_skips_replays() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let workspace = seed_workspace(&mut stdin, &mut reader, "coursesync-sync", false);
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "courses.upsert",
        json!({ "caller": admin(), "course": { "id": "c1", "schoolId": "s1", "name": "Physics" } }),
    );

    let batch = json!([
        lesson_envelope("L1", "c1", 4),
        lesson_envelope("L1", "c1", 9),
        lesson_envelope("L2", "c1", 6),
    ]);
    let partial = request(&mut stdin, &mut reader, "2", "sync.ingest", json!({ "envelopes": batch }));
    assert_eq!(error_code(&partial), Some("partial_batch"));
    let details = partial
        .get("error")
        .and_then(|e| e.get("details"))
        .cloned()
        .unwrap_or(Value::Null);
    assert_eq!(details.get("applied"), Some(&json!(["L1", "L2"])));
    assert_eq!(
        details
            .get("failures")
            .and_then(|f| f.get(0))
            .and_then(|f| f.get("naturalKey"))
            .and_then(|v| v.as_str()),
        Some("L1")
    );

    let course = request_ok(&mut stdin, &mut reader, "3", "courses.get", json!({ "courseId": "c1" }));
    let window = course.get("course").and_then(|c| c.get("window")).cloned();
    assert_eq!(
        window,
        Some(json!({ "start": "2024-03-04T09:00:00Z", "end": "2024-03-06T10:00:00Z" }))
    );

    let replay = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "sync.ingest",
        json!({ "envelopes": [lesson_envelope("L2", "c1", 6)] }),
    );
    assert_eq!(replay.get("skipped"), Some(&json!(["L2"])));
    assert_eq!(replay.get("applied"), Some(&json!([])));

    let membership = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "sync.studentLessons",
        json!({ "studentId": "st1", "lessonIds": ["L1", "L2", "L404"] }),
    );
    assert_eq!(membership.get("added"), Some(&json!(["L1", "L2"])));
    assert_eq!(membership.get("rejected"), Some(&json!(["L404"])));
    assert_eq!(membership.get("published").and_then(|v| v.as_u64()), Some(1));

    let drained = request_ok(&mut stdin, &mut reader, "6", "bus.drain", json!({}));
    let topics: Vec<String> = drained
        .get("messages")
        .and_then(|v| v.as_array())
        .map(|msgs| {
            msgs.iter()
                .filter_map(|m| m.get("topic").and_then(|t| t.as_str()).map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    assert_eq!(
        topics,
        vec!["lesson.created".to_string(), "student.lesson.membership".to_string()]
    );

    let cancelled = request(
        &mut stdin,
        &mut reader,
        "7",
        "sync.ingest",
        json!({ "cancelled": true, "envelopes": [lesson_envelope("L3", "c1", 8)] }),
    );
    assert_eq!(error_code(&cancelled), Some("cancelled"));
    let absent = request(&mut stdin, &mut reader, "8", "lessons.get", json!({ "lessonId": "L3" }));
    assert_eq!(error_code(&absent), Some("not_found"));

    let flush = request_ok(&mut stdin, &mut reader, "9", "outbox.flush", json!({}));
    assert_eq!(flush.get("pending").and_then(|v| v.as_i64()), Some(0));

    let _ = std::fs::remove_dir_all(&workspace);
}
