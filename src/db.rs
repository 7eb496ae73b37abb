use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("lms.sqlite3");
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS profiles(
            id TEXT PRIMARY KEY,
            role TEXT NOT NULL,
            full_name TEXT NOT NULL,
            email TEXT UNIQUE,
            xp_points INTEGER NOT NULL DEFAULT 0,
            created_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_profiles_role ON profiles(role)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS languages(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS study_levels(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            sort_order INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS specialties(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT,
            teacher_id TEXT,
            language_id TEXT,
            study_level_id TEXT,
            specialty_id TEXT,
            published INTEGER NOT NULL DEFAULT 0,
            created_at TEXT,
            FOREIGN KEY(teacher_id) REFERENCES profiles(id),
            FOREIGN KEY(language_id) REFERENCES languages(id),
            FOREIGN KEY(study_level_id) REFERENCES study_levels(id),
            FOREIGN KEY(specialty_id) REFERENCES specialties(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_courses_teacher ON courses(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sections(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            title TEXT NOT NULL,
            sort_order INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sections_course ON sections(course_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sections_course_sort ON sections(course_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lessons(
            id TEXT PRIMARY KEY,
            section_id TEXT NOT NULL,
            title TEXT NOT NULL,
            content TEXT,
            video_url TEXT,
            duration_minutes INTEGER,
            sort_order INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(section_id) REFERENCES sections(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lessons_section ON lessons(section_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lessons_section_sort ON lessons(section_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            enrolled_at TEXT,
            UNIQUE(student_id, course_id),
            FOREIGN KEY(student_id) REFERENCES profiles(id),
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_student ON enrollments(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_course ON enrollments(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lesson_progress(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            lesson_id TEXT NOT NULL,
            completed INTEGER NOT NULL DEFAULT 0,
            completed_at TEXT,
            UNIQUE(student_id, lesson_id),
            FOREIGN KEY(student_id) REFERENCES profiles(id),
            FOREIGN KEY(lesson_id) REFERENCES lessons(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lesson_progress_student ON lesson_progress(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lesson_progress_lesson ON lesson_progress(lesson_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS badges(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            description TEXT NOT NULL,
            xp_reward INTEGER NOT NULL DEFAULT 0,
            criteria_type TEXT NOT NULL,
            criteria_value INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_badges(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            badge_id TEXT NOT NULL,
            awarded_at TEXT,
            UNIQUE(student_id, badge_id),
            FOREIGN KEY(student_id) REFERENCES profiles(id),
            FOREIGN KEY(badge_id) REFERENCES badges(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_badges_student ON student_badges(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_badges_badge ON student_badges(badge_id)",
        [],
    )?;

    // Workspaces created before the publish workflow lack the flag on courses.
    ensure_courses_published(conn)?;

    Ok(())
}

fn ensure_courses_published(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "courses", "published")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE courses ADD COLUMN published INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
