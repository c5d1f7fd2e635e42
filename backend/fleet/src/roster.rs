//! # Roster
//!
//! Portable JSON export of a tenant's routes and riders, used to seed a fresh
//! database.
//!
//! ```json
//! {
//!   "tenantId": "lafayette-sd",
//!   "routes": [
//!     { "name": "North Loop", "stops": [{ "name": "Elm & 5th", "latitude": 40.42, "longitude": -86.91 }] }
//!   ],
//!   "students": [
//!     {
//!       "studentNumber": "S-1001", "firstName": "Ada", "lastName": "Byron", "grade": "4",
//!       "route": "North Loop", "stop": "Elm & 5th",
//!       "parent": { "name": "Anne Byron", "email": "anne@example.com", "phone": "+15555550100" }
//!     }
//!   ]
//! }
//! ```
//!
//! Stops are listed in riding order; the index becomes the stop sequence.
use std::fs;

use anyhow::{Context, Error};
use reqwest::get;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Roster {
    pub tenant_id: String,
    #[serde(default)]
    pub routes: Vec<RosterRoute>,
    #[serde(default)]
    pub students: Vec<RosterStudent>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterRoute {
    pub name: String,
    pub stops: Vec<RosterStop>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterStop {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterStudent {
    pub student_number: String,
    pub first_name: String,
    pub last_name: String,
    pub grade: Option<String>,
    pub route: Option<String>,
    pub stop: Option<String>,
    pub parent: RosterParent,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterParent {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

pub fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

pub async fn get_roster(source: &str) -> Result<Roster, Error> {
    if is_remote(source) {
        get_roster_remote(source).await
    } else {
        get_roster_file(source)
    }
}

pub fn get_roster_file(path: &str) -> Result<Roster, Error> {
    let data = fs::read(path).with_context(|| format!("reading roster {path}"))?;

    serde_json::from_slice(&data).with_context(|| format!("parsing roster {path}"))
}

pub async fn get_roster_remote(url: &str) -> Result<Roster, Error> {
    let response = get(url).await?.error_for_status()?;
    let bytes = response.bytes().await?;

    serde_json::from_slice(&bytes).with_context(|| format!("parsing roster from {url}"))
}
