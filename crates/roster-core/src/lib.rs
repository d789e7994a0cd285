//! Core domain model shared by the directory client, record store and sync engine.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub const CRATE_NAME: &str = "roster-core";

/// Grid role label assigned when the directory role id is not mapped.
pub const DEFAULT_ROLE: &str = "Teilnehmer";

/// A person's membership in one external directory group, normalized at the client boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryMember {
    pub person_id: String,
    pub first_name: String,
    pub last_name: String,
    pub group_type_role_id: i64,
    pub email: Option<String>,
}

impl DirectoryMember {
    /// `trim(firstName + " " + lastName)`; empty when both parts are missing.
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }
}

/// Local, editable projection of a directory member that drives the roster grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMember {
    pub id: String,
    pub name: String,
    pub group: String,
    #[serde(default)]
    pub role: String,
    #[serde(default, deserialize_with = "optional_identifier")]
    pub ct_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub allowed_services: Vec<String>,
}

/// Payload for a member record the store has not assigned an id to yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMember {
    pub name: String,
    pub group: String,
    pub role: String,
    pub ct_id: String,
    pub allowed_services: Vec<String>,
}

/// Fields reconciliation changes on an existing member; `None` leaves the field untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MemberPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ct_id: Option<String>,
}

impl MemberPatch {
    pub fn is_empty(&self) -> bool {
        self.role.is_none() && self.ct_id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredGroup {
    pub id: String,
    pub name: String,
    #[serde(default, deserialize_with = "optional_identifier")]
    pub ct_id: Option<String>,
}

/// Weekday column of a service rule: `"0"`..`"6"` (Sunday first) or `"Holiday"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RuleWeekday {
    Day(u8),
    Holiday,
}

impl RuleWeekday {
    pub const SUNDAY: Self = Self::Day(0);
    pub const WEDNESDAY: Self = Self::Day(3);

    pub fn is_sunday(self) -> bool {
        self == Self::SUNDAY
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid rule weekday {0:?}: expected 0-6 or \"Holiday\"")]
pub struct InvalidWeekday(pub String);

impl FromStr for RuleWeekday {
    type Err = InvalidWeekday;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("holiday") {
            return Ok(Self::Holiday);
        }
        match trimmed.parse::<u8>() {
            Ok(day) if day <= 6 => Ok(Self::Day(day)),
            _ => Err(InvalidWeekday(s.to_string())),
        }
    }
}

impl TryFrom<String> for RuleWeekday {
    type Error = InvalidWeekday;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RuleWeekday> for String {
    fn from(value: RuleWeekday) -> Self {
        value.to_string()
    }
}

impl fmt::Display for RuleWeekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Day(day) => write!(f, "{day}"),
            Self::Holiday => f.write_str("Holiday"),
        }
    }
}

/// Admin-configured set of permissible service codes for one calendar slot shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRule {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub weekday: RuleWeekday,
    pub time: String,
    /// 0 applies regardless of occurrence index.
    #[serde(default, deserialize_with = "null_as_default")]
    pub nth_sunday: u8,
    #[serde(default, deserialize_with = "null_as_default")]
    pub allowed_services: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub max_assignments: BTreeMap<String, u32>,
}

/// Composite slot key: external appointment id plus ISO date, rendered `{event}-{yyyy-mm-dd}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SlotId {
    pub event_id: String,
    pub date: NaiveDate,
}

impl SlotId {
    pub fn new(event_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            event_id: event_id.into(),
            date,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid slot id {0:?}: expected <event>-<yyyy-mm-dd>")]
pub struct InvalidSlotId(pub String);

impl FromStr for SlotId {
    type Err = InvalidSlotId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidSlotId(s.to_string());
        let split_at = s.len().checked_sub(10).ok_or_else(invalid)?;
        let head = s.get(..split_at).ok_or_else(invalid)?;
        let date = s.get(split_at..).ok_or_else(invalid)?;
        let event_id = head.strip_suffix('-').ok_or_else(invalid)?;
        if event_id.is_empty() {
            return Err(invalid());
        }
        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| invalid())?;
        Ok(Self::new(event_id, date))
    }
}

impl TryFrom<String> for SlotId {
    type Error = InvalidSlotId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SlotId> for String {
    fn from(value: SlotId) -> Self {
        value.to_string()
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.event_id, self.date.format("%Y-%m-%d"))
    }
}

/// Assignment state of one member in one roster cell.
///
/// JSON `null` means "no change", `""` means "cleared", anything else is a service code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CellCode {
    Unchanged,
    Cleared,
    Service(String),
}

impl CellCode {
    pub fn service(&self) -> Option<&str> {
        match self {
            Self::Service(code) => Some(code),
            _ => None,
        }
    }
}

impl From<Option<String>> for CellCode {
    fn from(value: Option<String>) -> Self {
        match value {
            None => Self::Unchanged,
            Some(code) if code.trim().is_empty() => Self::Cleared,
            Some(code) => Self::Service(code.trim().to_string()),
        }
    }
}

impl Serialize for CellCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Unchanged => serializer.serialize_none(),
            Self::Cleared => serializer.serialize_str(""),
            Self::Service(code) => serializer.serialize_str(code),
        }
    }
}

impl<'de> Deserialize<'de> for CellCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Option::<String>::deserialize(deserializer).map(Self::from)
    }
}

/// Member name -> assignment for one slot.
pub type RosterCell = BTreeMap<String, CellCode>;

/// Slot -> cell mapping persisted on a plan record.
pub type PlanData = BTreeMap<SlotId, RosterCell>;

pub const PLAN_STATUS_DRAFT: &str = "draft";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub period_start: String,
    pub period_end: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub data: PlanData,
    #[serde(default)]
    pub formatting: JsonValue,
    #[serde(default = "default_plan_status", deserialize_with = "status_or_draft")]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
}

fn default_plan_status() -> String {
    PLAN_STATUS_DRAFT.to_string()
}

fn status_or_draft<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let status = Option::<String>::deserialize(deserializer)?;
    Ok(status
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(default_plan_status))
}

/// One calendar appointment occurrence shown as a roster column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub id: SlotId,
    pub starts_at: DateTime<Utc>,
    /// Local wall-clock `HH:MM` used for rule lookup.
    pub time: String,
    pub label: String,
    pub calendar: String,
    pub calendar_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Calendar {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum BookingStatus {
    Requested,
    Confirmed,
    Rejected,
    Other(i64),
}

impl BookingStatus {
    pub fn id(self) -> i64 {
        match self {
            Self::Requested => 1,
            Self::Confirmed => 2,
            Self::Rejected => 3,
            Self::Other(id) => id,
        }
    }
}

impl From<i64> for BookingStatus {
    fn from(value: i64) -> Self {
        match value {
            1 => Self::Requested,
            2 => Self::Confirmed,
            3 => Self::Rejected,
            other => Self::Other(other),
        }
    }
}

impl From<BookingStatus> for i64 {
    fn from(value: BookingStatus) -> Self {
        value.id()
    }
}

/// A person's service assignment on one external event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub person_id: String,
    pub service_id: i64,
    pub status: BookingStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Absence {
    pub id: String,
    pub person_id: String,
    pub start_date: String,
    pub end_date: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceType {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppRole {
    Admin,
    #[default]
    #[serde(other)]
    User,
}

/// Login account provisioned from directory members that carry an email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: AppRole,
    #[serde(default, deserialize_with = "null_as_default")]
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUserAccount {
    pub email: String,
    #[serde(rename = "emailVisibility")]
    pub email_visibility: bool,
    pub password: String,
    #[serde(rename = "passwordConfirm")]
    pub password_confirm: String,
    pub name: String,
    pub role: AppRole,
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<AppRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.role.is_none() && self.groups.is_none()
    }
}

/// Meeting record. Legacy meetings carry no group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meeting {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "optional_identifier")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

impl Meeting {
    /// Stand-in for a meeting whose record could not be read.
    pub fn unknown(id: &str) -> Self {
        Self {
            id: id.to_string(),
            title: "Unbekanntes Meeting".to_string(),
            group: None,
            created: None,
            extra: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolItem {
    pub id: String,
    pub meeting_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub sort_order: i64,
    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeetingAttendance {
    pub id: String,
    pub meeting_id: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

/// Accepts `null`, `""`, strings and numbers; empty values become `None`.
pub fn optional_identifier<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(value.and_then(|v| identifier_from_json(&v)))
}

/// Renders a JSON string or number as an identifier; empty strings yield `None`.
pub fn identifier_from_json(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Store-side JSON fields are `null` until first written.
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
