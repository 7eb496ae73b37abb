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

struct Fixture {
    student_id: String,
    lesson_ids: Vec<String>,
}

/// One student enrolled in one course with `lesson_count` lessons in a
/// single section. Badges are seeded.
fn setup_course(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    lesson_count: usize,
) -> Fixture {
    let workspace = temp_dir("lmsd-progress");
    request_ok(
        stdin,
        reader,
        "setup-ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(stdin, reader, "setup-seed", "badges.seedDefaults", json!({}));

    let student = request_ok(
        stdin,
        reader,
        "setup-student",
        "students.create",
        json!({ "fullName": "Ada Lovelace" }),
    );
    let student_id = student
        .get("id")
        .and_then(|v| v.as_str())
        .expect("student id")
        .to_string();

    let course = request_ok(
        stdin,
        reader,
        "setup-course",
        "courses.create",
        json!({ "title": "Rust 101" }),
    );
    let course_id = course
        .get("id")
        .and_then(|v| v.as_str())
        .expect("course id")
        .to_string();
    let section = request_ok(
        stdin,
        reader,
        "setup-section",
        "sections.create",
        json!({ "courseId": course_id, "title": "Basics" }),
    );
    let section_id = section
        .get("id")
        .and_then(|v| v.as_str())
        .expect("section id")
        .to_string();

    let mut lesson_ids = Vec::new();
    for i in 0..lesson_count {
        let lesson = request_ok(
            stdin,
            reader,
            &format!("setup-lesson-{}", i),
            "lessons.create",
            json!({ "sectionId": section_id, "title": format!("Lesson {}", i + 1) }),
        );
        lesson_ids.push(
            lesson
                .get("id")
                .and_then(|v| v.as_str())
                .expect("lesson id")
                .to_string(),
        );
    }

    request_ok(
        stdin,
        reader,
        "setup-enroll",
        "enrollments.enroll",
        json!({ "studentId": student_id, "courseId": course_id }),
    );

    Fixture {
        student_id,
        lesson_ids,
    }
}

fn awarded_names(result: &serde_json::Value) -> Vec<String> {
    result
        .get("badgesAwarded")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|b| b.get("name").and_then(|v| v.as_str()))
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default()
}

#[test]
fn first_lesson_in_one_lesson_course_awards_both_badges() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_course(&mut stdin, &mut reader, 1);

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "progress.completeLesson",
        json!({ "studentId": fx.student_id, "lessonId": fx.lesson_ids[0] }),
    );
    assert_eq!(
        result.get("alreadyCompleted").and_then(|v| v.as_bool()),
        Some(false)
    );
    assert_eq!(result.get("xpGranted").and_then(|v| v.as_i64()), Some(10));
    let names = awarded_names(&result);
    assert!(names.iter().any(|n| n == "First Steps"), "got {:?}", names);
    assert!(
        names.iter().any(|n| n == "Course Champion"),
        "got {:?}",
        names
    );
    // Base 10 + First Steps 10 + Course Champion 50.
    assert_eq!(result.get("totalXp").and_then(|v| v.as_i64()), Some(70));

    let stats = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "stats.student",
        json!({ "studentId": fx.student_id }),
    );
    assert_eq!(stats.get("totalXp").and_then(|v| v.as_i64()), Some(70));
    assert_eq!(
        stats.get("lessonsCompleted").and_then(|v| v.as_i64()),
        Some(1)
    );
    assert_eq!(
        stats.get("coursesCompleted").and_then(|v| v.as_i64()),
        Some(1)
    );
    assert_eq!(stats.get("badgeCount").and_then(|v| v.as_i64()), Some(2));
}

#[test]
fn complete_lesson_twice_changes_nothing() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_course(&mut stdin, &mut reader, 2);

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "progress.completeLesson",
        json!({ "studentId": fx.student_id, "lessonId": fx.lesson_ids[0] }),
    );
    let total_after_first = first.get("totalXp").and_then(|v| v.as_i64()).expect("xp");

    let second = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "progress.completeLesson",
        json!({ "studentId": fx.student_id, "lessonId": fx.lesson_ids[0] }),
    );
    assert_eq!(
        second.get("alreadyCompleted").and_then(|v| v.as_bool()),
        Some(true)
    );
    assert_eq!(second.get("xpGranted").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(
        second.get("totalXp").and_then(|v| v.as_i64()),
        Some(total_after_first)
    );
    assert!(awarded_names(&second).is_empty());

    let progress = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "progress.listForStudent",
        json!({ "studentId": fx.student_id }),
    );
    let rows = progress
        .get("progress")
        .and_then(|v| v.as_array())
        .expect("progress rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].get("completed").and_then(|v| v.as_bool()),
        Some(true)
    );
}

#[test]
fn completion_requires_enrollment() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_course(&mut stdin, &mut reader, 1);

    let outsider = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "students.create",
        json!({ "fullName": "Grace Hopper" }),
    );
    let outsider_id = outsider.get("id").and_then(|v| v.as_str()).expect("id");

    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "progress.completeLesson",
        json!({ "studentId": outsider_id, "lessonId": fx.lesson_ids[0] }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        resp.get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("not_enrolled")
    );
}

#[test]
fn course_with_unfinished_lessons_is_not_completed() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_course(&mut stdin, &mut reader, 3);

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "progress.completeLesson",
        json!({ "studentId": fx.student_id, "lessonId": fx.lesson_ids[0] }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "progress.completeLesson",
        json!({ "studentId": fx.student_id, "lessonId": fx.lesson_ids[1] }),
    );

    let stats = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "stats.student",
        json!({ "studentId": fx.student_id }),
    );
    assert_eq!(
        stats.get("lessonsCompleted").and_then(|v| v.as_i64()),
        Some(2)
    );
    assert_eq!(
        stats.get("coursesCompleted").and_then(|v| v.as_i64()),
        Some(0)
    );

    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "progress.completeLesson",
        json!({ "studentId": fx.student_id, "lessonId": fx.lesson_ids[2] }),
    );
    let stats = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "stats.student",
        json!({ "studentId": fx.student_id }),
    );
    assert_eq!(
        stats.get("coursesCompleted").and_then(|v| v.as_i64()),
        Some(1)
    );
}

#[test]
fn enrollment_in_empty_course_never_counts_as_completed() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_course(&mut stdin, &mut reader, 1);

    let empty = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "courses.create",
        json!({ "title": "Placeholder Course" }),
    );
    let empty_id = empty.get("id").and_then(|v| v.as_str()).expect("id");
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "enrollments.enroll",
        json!({ "studentId": fx.student_id, "courseId": empty_id }),
    );

    let stats = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "stats.student",
        json!({ "studentId": fx.student_id }),
    );
    assert_eq!(
        stats.get("coursesCompleted").and_then(|v| v.as_i64()),
        Some(0)
    );
}
