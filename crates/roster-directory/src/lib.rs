//! External congregation directory client and boundary normalization.
//!
//! The directory's REST payloads carry the same concept under several historical shapes
//! (`person.domainAttributes.firstName`, `person.firstName`, `person.title`, ...). Everything
//! past this crate sees one strict record per concept.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use reqwest::Method;
use roster_core::{
    identifier_from_json, Absence, Booking, BookingStatus, Calendar, DirectoryMember,
    ServiceType, Slot, SlotId,
};
use roster_storage::{envelope_data, envelope_list, HttpClientConfig, HttpError, JsonHttpClient};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "roster-directory";

const PAGE_LIMIT: &str = "100";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{record} record missing {field}")]
pub struct NormalizeError {
    pub record: &'static str,
    pub field: &'static str,
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory api error: {0}")]
    Api(#[from] HttpError),
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    #[error("directory fixture rejected {0}")]
    Fixture(String),
}

#[async_trait]
pub trait DirectoryApi: Send + Sync {
    async fn group_members(&self, group_id: &str) -> Result<Vec<DirectoryMember>, DirectoryError>;

    /// Email from the full person record, for members whose group listing omits it.
    async fn person_email(&self, person_id: &str) -> Result<Option<String>, DirectoryError>;

    async fn absences(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        group_id: Option<&str>,
    ) -> Result<Vec<Absence>, DirectoryError>;

    async fn calendars(&self) -> Result<Vec<Calendar>, DirectoryError>;

    async fn appointments(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        calendar_ids: &[i64],
    ) -> Result<Vec<Slot>, DirectoryError>;

    async fn event_bookings(&self, event_id: &str) -> Result<Vec<Booking>, DirectoryError>;

    /// Creates the booking or updates its status when it already exists.
    async fn set_assignment(
        &self,
        event_id: &str,
        service_id: i64,
        person_id: &str,
        status: BookingStatus,
    ) -> Result<(), DirectoryError>;

    async fn delete_assignment(&self, event_id: &str, booking_id: &str) -> Result<(), DirectoryError>;

    async fn services(&self) -> Result<Vec<ServiceType>, DirectoryError>;
}

fn json_at<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    path.iter().try_fold(value, |cur, key| cur.get(*key))
}

fn json_str<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a str> {
    json_at(value, path)
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn json_id(value: &JsonValue, path: &[&str]) -> Option<String> {
    json_at(value, path).and_then(identifier_from_json)
}

fn json_i64(value: &JsonValue, path: &[&str]) -> Option<i64> {
    match json_at(value, path)? {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn first_str<'a>(value: &'a JsonValue, paths: &[&[&str]]) -> Option<&'a str> {
    paths.iter().find_map(|path| json_str(value, path))
}

fn first_id(value: &JsonValue, paths: &[&[&str]]) -> Option<String> {
    paths.iter().find_map(|path| json_id(value, path))
}

/// One group-membership row into a strict `DirectoryMember`.
///
/// Name fallback: `person.domainAttributes` -> `person` -> row -> split of `person.title`.
pub fn normalize_group_member(value: &JsonValue) -> Result<DirectoryMember, NormalizeError> {
    let person = value.get("person").filter(|p| p.is_object()).unwrap_or(value);

    let person_id = first_id(value, &[&["personId"], &["person", "domainIdentifier"]])
        .or_else(|| json_id(person, &["id"]))
        .ok_or(NormalizeError {
            record: "group member",
            field: "personId",
        })?;

    let title = json_str(person, &["title"]).unwrap_or_default();
    let mut title_parts = title.split_whitespace();
    let title_first = title_parts.next().unwrap_or_default().to_string();
    let title_rest = title_parts.collect::<Vec<_>>().join(" ");

    let first_name = first_str(person, &[&["domainAttributes", "firstName"], &["firstName"]])
        .or_else(|| json_str(value, &["firstName"]))
        .map(str::to_string)
        .unwrap_or(title_first);
    let last_name = first_str(person, &[&["domainAttributes", "lastName"], &["lastName"]])
        .or_else(|| json_str(value, &["lastName"]))
        .map(str::to_string)
        .unwrap_or(title_rest);

    let email = first_str(person, &[&["email"], &["domainAttributes", "email"]])
        .or_else(|| json_str(value, &["email"]))
        .map(str::to_string);

    Ok(DirectoryMember {
        person_id,
        first_name,
        last_name,
        group_type_role_id: json_i64(value, &["groupTypeRoleId"]).unwrap_or_default(),
        email,
    })
}

pub fn normalize_booking(value: &JsonValue) -> Result<Booking, NormalizeError> {
    let id = json_id(value, &["id"]).ok_or(NormalizeError {
        record: "booking",
        field: "id",
    })?;
    let person_id = first_id(
        value,
        &[&["personId"], &["person", "domainIdentifier"], &["person", "id"]],
    )
    .ok_or(NormalizeError {
        record: "booking",
        field: "personId",
    })?;
    let service_id = json_i64(value, &["serviceId"])
        .or_else(|| json_i64(value, &["service", "id"]))
        .ok_or(NormalizeError {
            record: "booking",
            field: "serviceId",
        })?;
    let status = json_i64(value, &["statusId"])
        .or_else(|| json_i64(value, &["status", "id"]))
        .or_else(|| json_i64(value, &["status"]))
        .map(BookingStatus::from)
        .unwrap_or(BookingStatus::Requested);

    Ok(Booking {
        id,
        person_id,
        service_id,
        status,
    })
}

pub fn normalize_absence(value: &JsonValue) -> Result<Absence, NormalizeError> {
    let missing = |field| NormalizeError {
        record: "absence",
        field,
    };
    Ok(Absence {
        id: json_id(value, &["id"]).ok_or_else(|| missing("id"))?,
        person_id: first_id(value, &[&["personId"], &["person", "domainIdentifier"]])
            .ok_or_else(|| missing("personId"))?,
        start_date: json_str(value, &["startDate"])
            .ok_or_else(|| missing("startDate"))?
            .to_string(),
        end_date: json_str(value, &["endDate"])
            .ok_or_else(|| missing("endDate"))?
            .to_string(),
        reason: json_str(value, &["absenceReason", "nameTranslated"])
            .unwrap_or_default()
            .to_string(),
    })
}

fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

/// Appointment occurrence into a roster slot; date and `HH:MM` are taken in `tz`.
pub fn normalize_appointment<Tz>(value: &JsonValue, tz: &Tz) -> Result<Slot, NormalizeError>
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let missing = |field| NormalizeError {
        record: "appointment",
        field,
    };
    let raw_start = first_str(
        value,
        &[
            &["calculated", "startDate"],
            &["base", "startDate"],
            &["appointment", "base", "startDate"],
            &["startDate"],
        ],
    )
    .ok_or_else(|| missing("startDate"))?;
    let starts_at = parse_instant(raw_start).ok_or_else(|| missing("startDate"))?;
    let local = starts_at.with_timezone(tz);

    let appointment_id = first_id(value, &[&["base", "id"], &["appointment", "base", "id"], &["id"]])
        .ok_or_else(|| missing("id"))?;

    Ok(Slot {
        id: SlotId::new(appointment_id, local.date_naive()),
        starts_at,
        time: local.format("%H:%M").to_string(),
        label: first_str(
            value,
            &[&["base", "title"], &["appointment", "base", "title"], &["caption"]],
        )
        .unwrap_or("Termin")
        .to_string(),
        calendar: first_str(
            value,
            &[&["base", "calendar", "name"], &["appointment", "base", "calendar", "name"]],
        )
        .unwrap_or("Unbekannt")
        .to_string(),
        calendar_id: json_i64(value, &["base", "calendar", "id"])
            .or_else(|| json_i64(value, &["appointment", "base", "calendar", "id"])),
    })
}

pub fn normalize_service(value: &JsonValue) -> Result<ServiceType, NormalizeError> {
    Ok(ServiceType {
        id: json_i64(value, &["id"]).ok_or(NormalizeError {
            record: "service",
            field: "id",
        })?,
        name: json_str(value, &["name"]).unwrap_or_default().to_string(),
    })
}

pub fn normalize_calendar(value: &JsonValue) -> Result<Calendar, NormalizeError> {
    Ok(Calendar {
        id: json_i64(value, &["id"]).ok_or(NormalizeError {
            record: "calendar",
            field: "id",
        })?,
        name: json_str(value, &["name"]).unwrap_or_default().to_string(),
    })
}

/// Normalizes every row, logging and dropping the ones that do not fit.
pub fn normalize_all<T>(
    rows: &[JsonValue],
    normalize: impl Fn(&JsonValue) -> Result<T, NormalizeError>,
) -> Vec<T> {
    rows.iter()
        .filter_map(|row| match normalize(row) {
            Ok(item) => Some(item),
            Err(err) => {
                warn!(error = %err, "skipping directory record");
                None
            }
        })
        .collect()
}

/// HTTP client for the directory REST API rooted at `{base_url}/api/`.
#[derive(Debug, Clone)]
pub struct ChurchDirectoryClient {
    http: JsonHttpClient,
}

impl ChurchDirectoryClient {
    pub fn new(base_url: &str, token: &str, config: &HttpClientConfig) -> anyhow::Result<Self> {
        let api_root = format!("{}/api", base_url.trim_end_matches('/'));
        let http = JsonHttpClient::new(&api_root, config)?
            .with_authorization(&format!("Login {token}"))
            .context("installing directory token")?;
        Ok(Self { http })
    }

    /// Follows `meta.pagination.lastPage` and concatenates every page's `data`.
    async fn get_all(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<JsonValue>, HttpError> {
        let mut rows = Vec::new();
        let mut page = 1i64;
        loop {
            let mut params = query.to_vec();
            params.push(("limit", PAGE_LIMIT.to_string()));
            params.push(("page", page.to_string()));
            let body = self.http.get_json(path, &params).await?;
            let last_page = json_i64(&body, &["meta", "pagination", "lastPage"]).unwrap_or(1);
            rows.extend(envelope_list(body));
            if page >= last_page {
                return Ok(rows);
            }
            page += 1;
        }
    }
}

fn ymd(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

#[async_trait]
impl DirectoryApi for ChurchDirectoryClient {
    async fn group_members(&self, group_id: &str) -> Result<Vec<DirectoryMember>, DirectoryError> {
        let rows = self.get_all(&format!("groups/{group_id}/members"), &[]).await?;
        info!(group_id, rows = rows.len(), "fetched group members");
        Ok(normalize_all(&rows, normalize_group_member))
    }

    async fn person_email(&self, person_id: &str) -> Result<Option<String>, DirectoryError> {
        let body = envelope_data(self.http.get_json(&format!("persons/{person_id}"), &[]).await?);
        Ok(first_str(&body, &[&["email"], &["domainAttributes", "email"]]).map(str::to_string))
    }

    async fn absences(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        group_id: Option<&str>,
    ) -> Result<Vec<Absence>, DirectoryError> {
        let path = match group_id {
            Some(group_id) => format!("groups/{group_id}/absences"),
            None => "persons/absences".to_string(),
        };
        let rows = self
            .get_all(&path, &[("from", ymd(from)), ("to", ymd(to))])
            .await?;
        Ok(normalize_all(&rows, normalize_absence))
    }

    async fn calendars(&self) -> Result<Vec<Calendar>, DirectoryError> {
        let body = self.http.get_json("calendars", &[]).await?;
        Ok(normalize_all(&envelope_list(body), normalize_calendar))
    }

    async fn appointments(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        calendar_ids: &[i64],
    ) -> Result<Vec<Slot>, DirectoryError> {
        let mut query = vec![("from", ymd(from)), ("to", ymd(to))];
        query.extend(calendar_ids.iter().map(|id| ("calendar_ids[]", id.to_string())));
        let body = self.http.get_json("calendars/appointments", &query).await?;
        Ok(normalize_all(&envelope_list(body), |row| normalize_appointment(row, &Local)))
    }

    async fn event_bookings(&self, event_id: &str) -> Result<Vec<Booking>, DirectoryError> {
        let body = self
            .http
            .get_json(&format!("events/{event_id}/bookings"), &[])
            .await?;
        Ok(normalize_all(&envelope_list(body), normalize_booking))
    }

    async fn set_assignment(
        &self,
        event_id: &str,
        service_id: i64,
        person_id: &str,
        status: BookingStatus,
    ) -> Result<(), DirectoryError> {
        let body = json!({"personId": person_id, "serviceId": service_id, "statusId": status.id()});
        self.http
            .send_json(Method::POST, &format!("events/{event_id}/bookings"), Some(&body))
            .await?;
        Ok(())
    }

    async fn delete_assignment(&self, event_id: &str, booking_id: &str) -> Result<(), DirectoryError> {
        self.http
            .send_json(
                Method::DELETE,
                &format!("events/{event_id}/bookings/{booking_id}"),
                None,
            )
            .await?;
        Ok(())
    }

    async fn services(&self) -> Result<Vec<ServiceType>, DirectoryError> {
        let body = self.http.get_json("services", &[]).await?;
        Ok(normalize_all(&envelope_list(body), normalize_service))
    }
}

/// Raw API payloads keyed the way the client requests them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DirectoryFixture {
    #[serde(default)]
    pub groups: BTreeMap<String, Vec<JsonValue>>,
    #[serde(default)]
    pub persons: BTreeMap<String, JsonValue>,
    #[serde(default)]
    pub absences: BTreeMap<String, Vec<JsonValue>>,
    #[serde(default)]
    pub calendars: Vec<JsonValue>,
    #[serde(default)]
    pub appointments: Vec<JsonValue>,
    #[serde(default)]
    pub bookings: BTreeMap<String, Vec<JsonValue>>,
    #[serde(default)]
    pub services: Vec<JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryCall {
    GroupMembers(String),
    PersonEmail(String),
    EventBookings(String),
    SetAssignment {
        event_id: String,
        service_id: i64,
        person_id: String,
        status: BookingStatus,
    },
    DeleteAssignment {
        event_id: String,
        booking_id: String,
    },
}

impl DirectoryCall {
    pub fn is_mutation(&self) -> bool {
        matches!(self, Self::SetAssignment { .. } | Self::DeleteAssignment { .. })
    }
}

#[derive(Debug, Default)]
struct FixtureState {
    fixture: DirectoryFixture,
    calls: Vec<DirectoryCall>,
    failing: Vec<DirectoryCall>,
    next_booking: u64,
}

/// Fixture-backed directory: reads go through the same normalizers as the HTTP client and
/// booking mutations are applied to the in-memory payloads.
#[derive(Debug, Default)]
pub struct FixtureDirectory {
    state: Mutex<FixtureState>,
}

impl FixtureDirectory {
    pub fn new(fixture: DirectoryFixture) -> Self {
        Self {
            state: Mutex::new(FixtureState {
                fixture,
                next_booking: 9000,
                ..FixtureState::default()
            }),
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let fixture = serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        Ok(Self::new(fixture))
    }

    /// Makes the given call fail every time it is issued.
    pub async fn fail_call(&self, call: DirectoryCall) {
        self.state.lock().await.failing.push(call);
    }

    pub async fn calls(&self) -> Vec<DirectoryCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn mutations(&self) -> Vec<DirectoryCall> {
        self.calls().await.into_iter().filter(DirectoryCall::is_mutation).collect()
    }

    pub async fn bookings_for(&self, event_id: &str) -> Vec<Booking> {
        let state = self.state.lock().await;
        state
            .fixture
            .bookings
            .get(event_id)
            .map(|rows| normalize_all(rows, normalize_booking))
            .unwrap_or_default()
    }

    async fn record(&self, call: DirectoryCall) -> Result<tokio::sync::MutexGuard<'_, FixtureState>, DirectoryError> {
        let mut state = self.state.lock().await;
        let fails = state.failing.contains(&call);
        let label = format!("{call:?}");
        state.calls.push(call);
        if fails {
            return Err(DirectoryError::Fixture(label));
        }
        Ok(state)
    }
}

#[async_trait]
impl DirectoryApi for FixtureDirectory {
    async fn group_members(&self, group_id: &str) -> Result<Vec<DirectoryMember>, DirectoryError> {
        let state = self.record(DirectoryCall::GroupMembers(group_id.to_string())).await?;
        let rows = state.fixture.groups.get(group_id).cloned().unwrap_or_default();
        Ok(normalize_all(&rows, normalize_group_member))
    }

    async fn person_email(&self, person_id: &str) -> Result<Option<String>, DirectoryError> {
        let state = self.record(DirectoryCall::PersonEmail(person_id.to_string())).await?;
        Ok(state
            .fixture
            .persons
            .get(person_id)
            .and_then(|p| first_str(p, &[&["email"], &["domainAttributes", "email"]]))
            .map(str::to_string))
    }

    async fn absences(
        &self,
        _from: NaiveDate,
        _to: NaiveDate,
        group_id: Option<&str>,
    ) -> Result<Vec<Absence>, DirectoryError> {
        let state = self.state.lock().await;
        let rows = match group_id {
            Some(group_id) => state.fixture.absences.get(group_id).cloned().unwrap_or_default(),
            None => state.fixture.absences.values().flatten().cloned().collect(),
        };
        Ok(normalize_all(&rows, normalize_absence))
    }

    async fn calendars(&self) -> Result<Vec<Calendar>, DirectoryError> {
        let state = self.state.lock().await;
        Ok(normalize_all(&state.fixture.calendars, normalize_calendar))
    }

    async fn appointments(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        calendar_ids: &[i64],
    ) -> Result<Vec<Slot>, DirectoryError> {
        let state = self.state.lock().await;
        Ok(normalize_all(&state.fixture.appointments, |row| normalize_appointment(row, &Utc))
            .into_iter()
            .filter(|slot| slot.id.date >= from && slot.id.date <= to)
            .filter(|slot| slot.calendar_id.is_some_and(|id| calendar_ids.contains(&id)))
            .collect())
    }

    async fn event_bookings(&self, event_id: &str) -> Result<Vec<Booking>, DirectoryError> {
        let state = self.record(DirectoryCall::EventBookings(event_id.to_string())).await?;
        let rows = state.fixture.bookings.get(event_id).cloned().unwrap_or_default();
        Ok(normalize_all(&rows, normalize_booking))
    }

    async fn set_assignment(
        &self,
        event_id: &str,
        service_id: i64,
        person_id: &str,
        status: BookingStatus,
    ) -> Result<(), DirectoryError> {
        let mut state = self
            .record(DirectoryCall::SetAssignment {
                event_id: event_id.to_string(),
                service_id,
                person_id: person_id.to_string(),
                status,
            })
            .await?;
        state.next_booking += 1;
        let new_id = state.next_booking.to_string();
        let rows = state.fixture.bookings.entry(event_id.to_string()).or_default();
        let existing = rows.iter_mut().find(|row| {
            normalize_booking(row)
                .is_ok_and(|b| b.person_id == person_id && b.service_id == service_id)
        });
        match existing {
            Some(row) => {
                if let Some(obj) = row.as_object_mut() {
                    obj.remove("status");
                    obj.insert("statusId".to_string(), json!(status.id()));
                }
            }
            None => rows.push(json!({
                "id": new_id,
                "personId": person_id,
                "serviceId": service_id,
                "statusId": status.id(),
            })),
        }
        Ok(())
    }

    async fn delete_assignment(&self, event_id: &str, booking_id: &str) -> Result<(), DirectoryError> {
        let mut state = self
            .record(DirectoryCall::DeleteAssignment {
                event_id: event_id.to_string(),
                booking_id: booking_id.to_string(),
            })
            .await?;
        if let Some(rows) = state.fixture.bookings.get_mut(event_id) {
            rows.retain(|row| json_id(row, &["id"]).as_deref() != Some(booking_id));
        }
        Ok(())
    }

    async fn services(&self) -> Result<Vec<ServiceType>, DirectoryError> {
        let state = self.state.lock().await;
        Ok(normalize_all(&state.fixture.services, normalize_service))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn fixture_path() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .join("fixtures/directory/preacher_group.json")
    }

    #[test]
    fn member_names_follow_fallback_order() {
        let modern = normalize_group_member(&json!({
            "personId": 19,
            "groupTypeRoleId": 9,
            "person": {"domainAttributes": {"firstName": "Viktor", "lastName": "Enns"}, "title": "Ignored Title"}
        }))
        .expect("modern shape");
        assert_eq!(modern.person_id, "19");
        assert_eq!(modern.display_name(), "Viktor Enns");
        assert_eq!(modern.group_type_role_id, 9);

        let legacy = normalize_group_member(&json!({
            "personId": "613",
            "person": {"firstName": "Viktor", "lastName": "Enns", "email": "v.enns@example.org"}
        }))
        .expect("legacy shape");
        assert_eq!(legacy.email.as_deref(), Some("v.enns@example.org"));
        assert_eq!(legacy.group_type_role_id, 0);

        let title_only = normalize_group_member(&json!({
            "person": {"domainIdentifier": "77", "title": "Anna Maria Penner"}
        }))
        .expect("title shape");
        assert_eq!(title_only.person_id, "77");
        assert_eq!(title_only.first_name, "Anna");
        assert_eq!(title_only.last_name, "Maria Penner");

        let bare_person = normalize_group_member(&json!({"id": 5, "firstName": "Paul", "lastName": "Wiens"}))
            .expect("bare person");
        assert_eq!(bare_person.person_id, "5");

        assert_eq!(
            normalize_group_member(&json!({"person": {"title": "No Id"}})),
            Err(NormalizeError {
                record: "group member",
                field: "personId"
            })
        );
    }

    #[test]
    fn bookings_accept_nested_and_flat_status() {
        let flat = normalize_booking(&json!({"id": 1, "personId": 19, "serviceId": 11, "statusId": 2}))
            .expect("flat");
        assert_eq!(flat.status, BookingStatus::Confirmed);
        let nested = normalize_booking(&json!({"id": "2", "person": {"domainIdentifier": "613"}, "service": {"id": "12"}, "status": {"id": 1}}))
            .expect("nested");
        assert_eq!(nested.person_id, "613");
        assert_eq!(nested.service_id, 12);
        assert_eq!(nested.status, BookingStatus::Requested);
    }

    #[test]
    fn appointments_become_slots_in_the_given_zone() {
        let slot = normalize_appointment(
            &json!({
                "base": {"id": 501, "title": "Gottesdienst", "calendar": {"id": 2, "name": "Gottesdienst"}},
                "calculated": {"startDate": "2026-03-01T08:30:00Z"}
            }),
            &Utc,
        )
        .expect("slot");
        assert_eq!(slot.id.to_string(), "501-2026-03-01");
        assert_eq!(slot.time, "08:30");
        assert_eq!(slot.calendar_id, Some(2));

        let nested = normalize_appointment(
            &json!({"appointment": {"base": {"id": 9, "startDate": "2026-03-04 18:00:00"}}}),
            &Utc,
        )
        .expect("nested slot");
        assert_eq!(nested.label, "Termin");
        assert_eq!(nested.calendar, "Unbekannt");
        assert_eq!(nested.time, "18:00");
    }

    #[tokio::test]
    async fn fixture_directory_applies_booking_mutations() {
        let directory = FixtureDirectory::from_path(fixture_path()).expect("fixture");
        let members = directory.group_members("164").await.expect("members");
        assert!(members.iter().any(|m| m.person_id == "613"));

        let before = directory.bookings_for("501").await;
        directory
            .set_assignment("501", 11, "19", BookingStatus::Confirmed)
            .await
            .expect("book");
        let after = directory.bookings_for("501").await;
        assert_eq!(after.len(), before.len() + 1);

        let booking = after.iter().find(|b| b.person_id == "19").expect("new booking");
        directory
            .delete_assignment("501", &booking.id)
            .await
            .expect("delete");
        assert_eq!(directory.bookings_for("501").await.len(), before.len());
        assert_eq!(directory.mutations().await.len(), 2);
    }

    #[tokio::test]
    async fn fixture_directory_injects_failures() {
        let directory = FixtureDirectory::new(DirectoryFixture::default());
        directory
            .fail_call(DirectoryCall::GroupMembers("31".into()))
            .await;
        assert!(directory.group_members("31").await.is_err());
        assert!(directory.group_members("164").await.expect("empty").is_empty());
    }
}
