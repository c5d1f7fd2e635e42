use chrono::Utc;
use fleet::models::{Id, Student};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Deserialize;
use tracing::info;

use super::{audit, count, soft_delete};
use crate::{
    database::Database,
    error::AppError,
    utils::{Page, PageRequest, TenantId, require_non_empty},
};

const STUDENT_COLUMNS: &str =
    "id, student_number, first_name, last_name, grade, parent_id, stop_id, created_at";

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewParent {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewStudent {
    pub student_number: String,
    pub first_name: String,
    pub last_name: String,
    pub grade: Option<String>,
    pub stop_id: Option<Id>,
    pub parent: NewParent,
}

fn student_from_row(row: &Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: row.get(0)?,
        student_number: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        grade: row.get(4)?,
        parent_id: row.get(5)?,
        stop_id: row.get(6)?,
        created_at: row.get(7)?,
    })
}

/// Stop ids only count while their route is live.
pub(crate) fn stop_exists(conn: &Connection, tenant: &TenantId, stop_id: Id) -> Result<bool, AppError> {
    let found = conn.query_row(
        "SELECT EXISTS(
             SELECT 1 FROM stops s JOIN routes r ON r.id = s.route_id
             WHERE s.tenant_id = ?1 AND s.id = ?2 AND r.is_deleted = 0)",
        params![tenant.as_str(), stop_id],
        |r| r.get(0),
    )?;

    Ok(found)
}

pub(crate) fn load_student(conn: &Connection, tenant: &TenantId, id: Id) -> Result<Student, AppError> {
    conn.query_row(
        &format!("SELECT {STUDENT_COLUMNS} FROM students WHERE tenant_id = ?1 AND id = ?2 AND is_deleted = 0"),
        params![tenant.as_str(), id],
        student_from_row,
    )
    .optional()?
    .ok_or(AppError::NotFound("Student"))
}

/// Students assigned to any of `stop_ids`.
pub(crate) fn students_at_stops(
    conn: &Connection,
    tenant: &TenantId,
    stop_ids: &[Id],
) -> Result<Vec<Student>, AppError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {STUDENT_COLUMNS} FROM students
         WHERE tenant_id = ?1 AND stop_id = ?2 AND is_deleted = 0
         ORDER BY id"
    ))?;

    let mut students = Vec::new();
    for stop_id in stop_ids {
        let rows = stmt.query_map(params![tenant.as_str(), stop_id], student_from_row)?;
        for student in rows {
            students.push(student?);
        }
    }

    Ok(students)
}

/// Reuse the parent account with this email, or create it.
fn provision_parent(conn: &Connection, tenant: &TenantId, parent: &NewParent) -> Result<Id, AppError> {
    let email = require_non_empty("Parent email", &parent.email)?.to_lowercase();

    let existing: Option<Id> = conn
        .query_row(
            "SELECT id FROM parents WHERE tenant_id = ?1 AND email = ?2 AND is_deleted = 0",
            params![tenant.as_str(), email],
            |r| r.get(0),
        )
        .optional()?;

    if let Some(id) = existing {
        return Ok(id);
    }

    let name = require_non_empty("Parent name", &parent.name)?;
    conn.execute(
        "INSERT INTO parents (tenant_id, name, email, phone, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![tenant.as_str(), name, email, parent.phone, Utc::now()],
    )?;

    let id = conn.last_insert_rowid();
    audit::record(conn, tenant, "Parent", id, "Created", Some(email.as_str()))?;

    Ok(id)
}

/// Create the student and, if needed, the parent account, atomically.
pub fn insert_student(conn: &mut Connection, tenant: &TenantId, input: &NewStudent) -> Result<Student, AppError> {
    let student_number = require_non_empty("Student number", &input.student_number)?;
    let first_name = require_non_empty("First name", &input.first_name)?;
    let last_name = require_non_empty("Last name", &input.last_name)?;

    let tx = conn.transaction()?;

    let taken = count(
        &tx,
        "SELECT COUNT(*) FROM students WHERE tenant_id = ?1 AND student_number = ?2 AND is_deleted = 0",
        params![tenant.as_str(), student_number],
    )?;
    if taken > 0 {
        return Err(AppError::Duplicate(format!(
            "Student number {student_number} already exists"
        )));
    }

    if let Some(stop_id) = input.stop_id {
        if !stop_exists(&tx, tenant, stop_id)? {
            return Err(AppError::NotFound("Stop"));
        }
    }

    let parent_id = provision_parent(&tx, tenant, &input.parent)?;

    tx.execute(
        "INSERT INTO students
             (tenant_id, student_number, first_name, last_name, grade, parent_id, stop_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            tenant.as_str(),
            student_number,
            first_name,
            last_name,
            input.grade,
            parent_id,
            input.stop_id,
            Utc::now()
        ],
    )?;
    let id = tx.last_insert_rowid();

    audit::record(&tx, tenant, "Student", id, "Created", Some(student_number.as_str()))?;
    let student = load_student(&tx, tenant, id)?;

    tx.commit()?;

    Ok(student)
}

pub async fn create_student(db: &Database, tenant: TenantId, input: NewStudent) -> Result<Student, AppError> {
    let student = db.call(move |conn| insert_student(conn, &tenant, &input)).await?;

    info!("Created student {} ({})", student.id, student.student_number);
    Ok(student)
}

pub async fn get_student(db: &Database, tenant: TenantId, id: Id) -> Result<Student, AppError> {
    db.call(move |conn| load_student(conn, &tenant, id)).await
}

pub async fn list_students(
    db: &Database,
    tenant: TenantId,
    search: Option<String>,
    page: PageRequest,
) -> Result<Page<Student>, AppError> {
    db.call(move |conn| {
        let pattern = format!("%{}%", search.unwrap_or_default().trim());
        let filter = "tenant_id = ?1 AND is_deleted = 0
             AND (first_name || ' ' || last_name LIKE ?2 OR student_number LIKE ?2)";

        let total = count(
            conn,
            &format!("SELECT COUNT(*) FROM students WHERE {filter}"),
            params![tenant.as_str(), pattern],
        )?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {STUDENT_COLUMNS} FROM students WHERE {filter}
             ORDER BY last_name, first_name, id LIMIT ?3 OFFSET ?4"
        ))?;
        let items = stmt
            .query_map(
                params![tenant.as_str(), pattern, page.limit(), page.offset()],
                student_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page::new(items, page, total))
    })
    .await
}

pub async fn assign_stop(
    db: &Database,
    tenant: TenantId,
    id: Id,
    stop_id: Option<Id>,
) -> Result<Student, AppError> {
    db.call(move |conn| {
        let tx = conn.transaction()?;

        load_student(&tx, &tenant, id)?;
        if let Some(stop_id) = stop_id {
            if !stop_exists(&tx, &tenant, stop_id)? {
                return Err(AppError::NotFound("Stop"));
            }
        }

        tx.execute(
            "UPDATE students SET stop_id = ?1 WHERE tenant_id = ?2 AND id = ?3",
            params![stop_id, tenant.as_str(), id],
        )?;
        let details = stop_id.map(|s| format!("stop {s}"));
        audit::record(&tx, &tenant, "Student", id, "StopAssigned", details.as_deref())?;

        let student = load_student(&tx, &tenant, id)?;
        tx.commit()?;

        Ok(student)
    })
    .await
}

pub async fn delete_student(db: &Database, tenant: TenantId, id: Id) -> Result<(), AppError> {
    db.call(move |conn| {
        let tx = conn.transaction()?;

        soft_delete(&tx, "students", "Student", &tenant, id)?;
        audit::record(&tx, &tenant, "Student", id, "Deleted", None)?;

        tx.commit()?;
        Ok(())
    })
    .await?;

    info!("Deleted student {id}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant() -> TenantId {
        TenantId("north".into())
    }

    fn new_student(number: &str, email: &str) -> NewStudent {
        NewStudent {
            student_number: number.into(),
            first_name: "Ada".into(),
            last_name: "Byron".into(),
            grade: Some("4".into()),
            stop_id: None,
            parent: NewParent {
                name: "Anne Byron".into(),
                email: email.into(),
                phone: None,
            },
        }
    }

    #[tokio::test]
    async fn test_siblings_share_parent() {
        let db = Database::open_in_memory().unwrap();

        let first = create_student(&db, tenant(), new_student("S-1", "anne@example.com"))
            .await
            .unwrap();
        let second = create_student(&db, tenant(), new_student("S-2", "ANNE@example.com"))
            .await
            .unwrap();

        assert_eq!(first.parent_id, second.parent_id);
    }

    #[tokio::test]
    async fn test_duplicate_student_number_rolls_back() {
        let db = Database::open_in_memory().unwrap();

        create_student(&db, tenant(), new_student("S-1", "a@example.com"))
            .await
            .unwrap();
        let err = create_student(&db, tenant(), new_student("S-1", "b@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Duplicate(_)));

        // the second parent was never provisioned
        let parents: i64 = db
            .call(|conn| count(conn, "SELECT COUNT(*) FROM parents", ()))
            .await
            .unwrap();
        assert_eq!(parents, 1);
    }

    #[tokio::test]
    async fn test_unknown_stop_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let mut input = new_student("S-1", "a@example.com");
        input.stop_id = Some(42);

        let err = create_student(&db, tenant(), input).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound("Stop")));
    }

    #[tokio::test]
    async fn test_soft_delete_hides_student_and_frees_number() {
        let db = Database::open_in_memory().unwrap();
        let student = create_student(&db, tenant(), new_student("S-1", "a@example.com"))
            .await
            .unwrap();

        delete_student(&db, tenant(), student.id).await.unwrap();

        assert!(matches!(
            get_student(&db, tenant(), student.id).await,
            Err(AppError::NotFound("Student"))
        ));
        assert!(matches!(
            delete_student(&db, tenant(), student.id).await,
            Err(AppError::NotFound("Student"))
        ));
        create_student(&db, tenant(), new_student("S-1", "a@example.com"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_list_search_and_tenant_isolation() {
        let db = Database::open_in_memory().unwrap();
        let mut grace = new_student("S-2", "h@example.com");
        grace.first_name = "Grace".into();
        grace.last_name = "Hopper".into();

        create_student(&db, tenant(), new_student("S-1", "a@example.com"))
            .await
            .unwrap();
        create_student(&db, tenant(), grace).await.unwrap();
        create_student(&db, TenantId("south".into()), new_student("S-9", "z@example.com"))
            .await
            .unwrap();

        let all = list_students(&db, tenant(), None, PageRequest::default())
            .await
            .unwrap();
        assert_eq!(all.total_count, 2);
        assert_eq!(all.items[0].last_name, "Byron");

        let found = list_students(&db, tenant(), Some("hop".into()), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(found.total_count, 1);
        assert_eq!(found.items[0].first_name, "Grace");

        let second_page = list_students(&db, tenant(), None, PageRequest::new(Some(2), Some(1)))
            .await
            .unwrap();
        assert_eq!(second_page.items.len(), 1);
        assert_eq!(second_page.items[0].last_name, "Hopper");
    }
}
