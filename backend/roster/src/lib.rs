//! # Roster Import
//!
//! Loads a [`Roster`] from disk or a URL and writes it into the database:
//! routes first, then students matched to their stop by route and stop name.
//!
//! Names are sanitised before they are stored. Students whose number already
//! exists for the tenant are skipped, so re-running an import is harmless.
//! A student naming a route or stop that is not in the roster is imported
//! without a stop.
use std::collections::HashMap;

use anyhow::Error;
use fleet::{
    models::Id,
    roster::{Roster, RosterStudent, get_roster},
};
use indicatif::{ProgressBar, ProgressStyle};
use server::{
    database::Database,
    error::AppError,
    services::{
        routes::{NewRoute, NewStop, insert_route},
        students::{NewParent, NewStudent, insert_student},
    },
    utils::TenantId,
};
use tracing::{info, warn};

pub mod utils;

use utils::{name_key, sanitize};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub routes: usize,
    pub students: usize,
    pub skipped: usize,
}

/// `(route key, stop key)` to stop id.
type StopIndex = HashMap<(String, String), Id>;

pub async fn import_from(source: &str, database_path: &str) -> Result<ImportSummary, Error> {
    let roster = get_roster(source).await?;
    let db = Database::open(database_path)?;

    import_roster(&db, roster).await
}

fn progress_bar(len: usize) -> Result<ProgressBar, Error> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        )?
        .progress_chars("=> "),
    );

    Ok(pb)
}

fn new_student(student: &RosterStudent, stop_id: Option<Id>) -> NewStudent {
    NewStudent {
        student_number: sanitize(&student.student_number),
        first_name: sanitize(&student.first_name),
        last_name: sanitize(&student.last_name),
        grade: student.grade.as_deref().map(sanitize).filter(|g| !g.is_empty()),
        stop_id,
        parent: NewParent {
            name: sanitize(&student.parent.name),
            email: student.parent.email.trim().to_string(),
            phone: student.parent.phone.as_ref().map(|p| p.trim().to_string()),
        },
    }
}

fn lookup_stop(stops: &StopIndex, student: &RosterStudent) -> Option<Id> {
    let (route, stop) = (student.route.as_deref()?, student.stop.as_deref()?);
    let found = stops.get(&(name_key(route), name_key(stop))).copied();

    if found.is_none() {
        warn!(
            "Student {}: no stop {stop} on route {route}, importing without a stop",
            student.student_number
        );
    }

    found
}

pub async fn import_roster(db: &Database, roster: Roster) -> Result<ImportSummary, Error> {
    let tenant = TenantId::parse(&roster.tenant_id)?;
    let mut summary = ImportSummary::default();
    let mut stops = StopIndex::new();

    info!(
        "Importing {} routes and {} students for {}",
        roster.routes.len(),
        roster.students.len(),
        tenant.as_str()
    );
    let pb = progress_bar(roster.routes.len() + roster.students.len())?;

    pb.set_message("routes");
    for route in &roster.routes {
        let input = NewRoute {
            name: sanitize(&route.name),
            stops: route
                .stops
                .iter()
                .map(|s| NewStop {
                    name: sanitize(&s.name),
                    latitude: s.latitude,
                    longitude: s.longitude,
                })
                .collect(),
        };

        let tenant = tenant.clone();
        let created = db.call(move |conn| insert_route(conn, &tenant, &input)).await?;

        let route_key = name_key(&created.name);
        for stop in &created.stops {
            stops.insert((route_key.clone(), name_key(&stop.name)), stop.id);
        }

        #[cfg(feature = "verbose")]
        info!("Route {} with {} stops", created.name, created.stops.len());

        summary.routes += 1;
        pb.inc(1);
    }

    pb.set_message("students");
    for student in &roster.students {
        let input = new_student(student, lookup_stop(&stops, student));

        let tenant = tenant.clone();
        match db.call(move |conn| insert_student(conn, &tenant, &input)).await {
            Ok(_created) => {
                #[cfg(feature = "verbose")]
                info!("Student {} ({})", _created.full_name(), _created.student_number);

                summary.students += 1;
            }
            Err(AppError::Duplicate(message)) => {
                warn!("Skipping student: {message}");
                summary.skipped += 1;
            }
            Err(e) => return Err(e.into()),
        }
        pb.inc(1);
    }

    pb.finish_with_message("done");
    info!(
        "Imported {} routes, {} students, skipped {}",
        summary.routes, summary.students, summary.skipped
    );

    Ok(summary)
}
