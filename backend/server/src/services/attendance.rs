use chrono::{NaiveDate, Utc};
use fleet::models::{AttendanceRecord, AttendanceStatus, Id};
use rusqlite::{OptionalExtension, Row, params};
use serde::Deserialize;
use tracing::info;

use super::{audit, count, students::load_student, trips::load_trip};
use crate::{
    database::{Database, is_unique_violation, parse_column},
    error::AppError,
    utils::{Page, PageRequest, TenantId},
};

const ATTENDANCE_COLUMNS: &str = "id, student_id, trip_id, date, status, notes, recorded_at";

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAttendance {
    pub student_id: Id,
    pub trip_id: Id,
    pub status: AttendanceStatus,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceFilter {
    pub trip_id: Option<Id>,
    pub student_id: Option<Id>,
    pub date: Option<NaiveDate>,
}

fn attendance_from_row(row: &Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    Ok(AttendanceRecord {
        id: row.get(0)?,
        student_id: row.get(1)?,
        trip_id: row.get(2)?,
        date: row.get(3)?,
        status: parse_column(row, 4)?,
        notes: row.get(5)?,
        recorded_at: row.get(6)?,
    })
}

/// One record per student, trip and day; the day is today.
pub async fn record_attendance(
    db: &Database,
    tenant: TenantId,
    input: NewAttendance,
) -> Result<AttendanceRecord, AppError> {
    let record = db
        .call(move |conn| {
            let now = Utc::now();
            let today = now.date_naive();
            let tx = conn.transaction()?;

            load_student(&tx, &tenant, input.student_id)?;
            load_trip(&tx, &tenant, input.trip_id)?;

            let inserted = tx.execute(
                "INSERT INTO attendance (tenant_id, student_id, trip_id, date, status, notes, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    tenant.as_str(),
                    input.student_id,
                    input.trip_id,
                    today,
                    input.status.as_str(),
                    input.notes,
                    now
                ],
            );
            match inserted {
                Err(e) if is_unique_violation(&e) => {
                    return Err(AppError::Duplicate(format!(
                        "Attendance for student {} on trip {} is already recorded for {today}",
                        input.student_id, input.trip_id
                    )));
                }
                other => other?,
            };

            let id = tx.last_insert_rowid();
            let details = input.status.as_str();
            audit::record(&tx, &tenant, "Attendance", id, "Recorded", Some(details))?;

            let record = tx
                .query_row(
                    &format!("SELECT {ATTENDANCE_COLUMNS} FROM attendance WHERE id = ?1"),
                    [id],
                    attendance_from_row,
                )
                .optional()?
                .ok_or(AppError::NotFound("Attendance record"))?;

            tx.commit()?;
            Ok(record)
        })
        .await?;

    info!(
        "Student {} marked {} on trip {}",
        record.student_id, record.status, record.trip_id
    );
    Ok(record)
}

pub async fn list_attendance(
    db: &Database,
    tenant: TenantId,
    filter: AttendanceFilter,
    page: PageRequest,
) -> Result<Page<AttendanceRecord>, AppError> {
    db.call(move |conn| {
        let where_clause = "tenant_id = ?1 AND is_deleted = 0
             AND (?2 IS NULL OR trip_id = ?2)
             AND (?3 IS NULL OR student_id = ?3)
             AND (?4 IS NULL OR date = ?4)";

        let total = count(
            conn,
            &format!("SELECT COUNT(*) FROM attendance WHERE {where_clause}"),
            params![tenant.as_str(), filter.trip_id, filter.student_id, filter.date],
        )?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {ATTENDANCE_COLUMNS} FROM attendance WHERE {where_clause}
             ORDER BY date DESC, id DESC LIMIT ?5 OFFSET ?6"
        ))?;
        let items = stmt
            .query_map(
                params![
                    tenant.as_str(),
                    filter.trip_id,
                    filter.student_id,
                    filter.date,
                    page.limit(),
                    page.offset()
                ],
                attendance_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page::new(items, page, total))
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        students::{NewParent, NewStudent, create_student},
        trips::tests::scheduled_trip,
    };

    async fn setup(db: &Database, tenant: &TenantId) -> (Id, Id) {
        let trip = scheduled_trip(db, tenant, &[(40.0, -86.0)]).await;
        let student = create_student(
            db,
            tenant.clone(),
            NewStudent {
                student_number: "S-1".into(),
                first_name: "Ada".into(),
                last_name: "Byron".into(),
                grade: None,
                stop_id: None,
                parent: NewParent {
                    name: "Anne".into(),
                    email: "anne@example.com".into(),
                    phone: None,
                },
            },
        )
        .await
        .unwrap();

        (student.id, trip.id)
    }

    #[tokio::test]
    async fn test_second_record_same_day_is_duplicate() {
        let db = Database::open_in_memory().unwrap();
        let tenant = TenantId("north".into());
        let (student_id, trip_id) = setup(&db, &tenant).await;

        let input = NewAttendance {
            student_id,
            trip_id,
            status: AttendanceStatus::Late,
            notes: Some("missed the first bell".into()),
        };

        let record = record_attendance(&db, tenant.clone(), input.clone()).await.unwrap();
        assert_eq!(record.status, AttendanceStatus::Late);
        assert_eq!(record.date, Utc::now().date_naive());

        let err = record_attendance(&db, tenant, input).await.unwrap_err();
        assert!(matches!(err, AppError::Duplicate(_)));
    }

    #[tokio::test]
    async fn test_unknown_student_or_trip() {
        let db = Database::open_in_memory().unwrap();
        let tenant = TenantId("north".into());
        let (student_id, trip_id) = setup(&db, &tenant).await;

        let err = record_attendance(
            &db,
            tenant.clone(),
            NewAttendance {
                student_id: 999,
                trip_id,
                status: AttendanceStatus::Present,
                notes: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::NotFound("Student")));

        let err = record_attendance(
            &db,
            tenant,
            NewAttendance {
                student_id,
                trip_id: 999,
                status: AttendanceStatus::Present,
                notes: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::NotFound("Trip")));
    }

    #[tokio::test]
    async fn test_list_filters() {
        let db = Database::open_in_memory().unwrap();
        let tenant = TenantId("north".into());
        let (student_id, trip_id) = setup(&db, &tenant).await;

        record_attendance(
            &db,
            tenant.clone(),
            NewAttendance {
                student_id,
                trip_id,
                status: AttendanceStatus::Present,
                notes: None,
            },
        )
        .await
        .unwrap();

        let by_trip = list_attendance(
            &db,
            tenant.clone(),
            AttendanceFilter {
                trip_id: Some(trip_id),
                ..Default::default()
            },
            PageRequest::default(),
        )
        .await
        .unwrap();
        assert_eq!(by_trip.total_count, 1);

        let other_trip = list_attendance(
            &db,
            tenant,
            AttendanceFilter {
                trip_id: Some(trip_id + 1),
                ..Default::default()
            },
            PageRequest::default(),
        )
        .await
        .unwrap();
        assert_eq!(other_trip.total_count, 0);
    }
}
