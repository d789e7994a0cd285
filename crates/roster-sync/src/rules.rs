//! Service-rule resolution, service catalogue lookup and plan validation.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, NaiveDate};
use roster_core::{
    CellCode, InvalidSlotId, PlanData, RosterCell, RuleWeekday, ServiceRule, Slot, SlotId,
    StoredMember,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Rule-table weekday of a calendar date; holidays shadow the real weekday.
pub fn slot_weekday(date: NaiveDate, is_holiday: bool) -> RuleWeekday {
    if is_holiday {
        return RuleWeekday::Holiday;
    }
    let day = u8::try_from(date.weekday().num_days_from_sunday()).unwrap_or_default();
    RuleWeekday::Day(day)
}

/// 1-based occurrence of the date's weekday within its month.
pub fn nth_weekday_of_month(date: NaiveDate) -> u8 {
    u8::try_from((date.day() - 1) / 7 + 1).unwrap_or(5)
}

/// `nth_sunday` key of a slot: the occurrence index on Sundays, 0 otherwise.
pub fn nth_sunday(date: NaiveDate, is_holiday: bool) -> u8 {
    if slot_weekday(date, is_holiday).is_sunday() {
        nth_weekday_of_month(date)
    } else {
        0
    }
}

/// `H:MM` and `HH:MM` compare equal.
pub fn normalize_clock(time: &str) -> String {
    let time = time.trim();
    match time.split_once(':') {
        Some((h, m)) if h.len() == 1 => format!("0{h}:{m}"),
        _ => time.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleMatch<'a> {
    Matched(&'a ServiceRule),
    /// No rule covers the slot; any code is accepted.
    Unconfigured,
}

impl<'a> RuleMatch<'a> {
    pub fn rule(&self) -> Option<&'a ServiceRule> {
        match *self {
            Self::Matched(rule) => Some(rule),
            Self::Unconfigured => None,
        }
    }

    pub fn permits(&self, code: &str) -> bool {
        match *self {
            Self::Matched(rule) => rule.allowed_services.iter().any(|s| s == code),
            Self::Unconfigured => true,
        }
    }

    pub fn cap_for(&self, code: &str) -> Option<u32> {
        self.rule().and_then(|rule| rule.max_assignments.get(code).copied())
    }
}

/// First rule matching `(weekday, time, nth_sunday)`; duplicates after it are ignored.
pub fn rule_for_slot<'a>(
    date: NaiveDate,
    time: &str,
    is_holiday: bool,
    rules: &'a [ServiceRule],
) -> RuleMatch<'a> {
    let weekday = slot_weekday(date, is_holiday);
    let nth = nth_sunday(date, is_holiday);
    let time = normalize_clock(time);
    rules
        .iter()
        .find(|rule| {
            rule.weekday == weekday
                && normalize_clock(&rule.time) == time
                && (!weekday.is_sunday() || rule.nth_sunday == nth)
        })
        .map_or(RuleMatch::Unconfigured, RuleMatch::Matched)
}

/// Ordered allowed codes for a slot; empty when no rule is configured.
pub fn permitted_services(
    date: NaiveDate,
    time: &str,
    is_holiday: bool,
    rules: &[ServiceRule],
) -> Vec<String> {
    rule_for_slot(date, time, is_holiday, rules)
        .rule()
        .map(|rule| rule.allowed_services.clone())
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceOverride {
    pub code: String,
    /// 0 = Sunday.
    pub weekday: u8,
    pub service_id: i64,
}

/// Short service code -> directory service-type id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCatalog {
    pub codes: BTreeMap<String, i64>,
    #[serde(default)]
    pub weekday_overrides: Vec<ServiceOverride>,
}

impl Default for ServiceCatalog {
    fn default() -> Self {
        let codes = [
            ("L", 11),
            ("1", 12),
            ("2", 13),
            ("V", 14),
            ("BN", 15),
            ("🍷", 16),
            ("Als", 17),
            ("BS", 19),
            ("GS", 20),
            ("Anf", 21),
            ("Schl", 22),
        ]
        .into_iter()
        .map(|(code, id)| (code.to_string(), id))
        .collect();
        Self {
            codes,
            weekday_overrides: vec![ServiceOverride {
                code: "Als".to_string(),
                weekday: 3,
                service_id: 18,
            }],
        }
    }
}

impl ServiceCatalog {
    fn weekday_of(date: NaiveDate) -> u32 {
        date.weekday().num_days_from_sunday()
    }

    pub fn resolve_service_id(&self, code: &str, date: NaiveDate) -> Option<i64> {
        let weekday = Self::weekday_of(date);
        self.weekday_overrides
            .iter()
            .find(|o| o.code == code && u32::from(o.weekday) == weekday)
            .map(|o| o.service_id)
            .or_else(|| self.codes.get(code).copied())
    }

    /// Reverse lookup honouring the same weekday overrides.
    pub fn code_for(&self, service_id: i64, date: NaiveDate) -> Option<&str> {
        let weekday = Self::weekday_of(date);
        if let Some(o) = self
            .weekday_overrides
            .iter()
            .find(|o| o.service_id == service_id && u32::from(o.weekday) == weekday)
        {
            return Some(o.code.as_str());
        }
        self.codes
            .iter()
            .find(|(code, id)| **id == service_id && self.resolve_service_id(code, date) == Some(service_id))
            .map(|(code, _)| code.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanValidationError {
    #[error("plan data is not valid JSON: {0}")]
    Json(String),
    #[error("plan data must be an object keyed by slot id")]
    NotAnObject,
    #[error(transparent)]
    SlotId(#[from] InvalidSlotId),
    #[error("cell {slot} must be an object of member name -> code")]
    Cell { slot: String },
    #[error("cell {slot} has a non-string code for {member}")]
    Code { slot: String, member: String },
}

pub fn validate_plan_json(text: &str) -> Result<PlanData, PlanValidationError> {
    let value: JsonValue =
        serde_json::from_str(text).map_err(|err| PlanValidationError::Json(err.to_string()))?;
    validate_plan_value(&value)
}

/// Strict walk of submitted grid data; `null` stays "no change", `""` is "cleared".
pub fn validate_plan_value(value: &JsonValue) -> Result<PlanData, PlanValidationError> {
    let slots = match value {
        JsonValue::Object(map) => map,
        JsonValue::Null => return Ok(PlanData::new()),
        _ => return Err(PlanValidationError::NotAnObject),
    };

    let mut data = PlanData::new();
    for (raw_slot, cell) in slots {
        let slot_id: SlotId = raw_slot.parse()?;
        let JsonValue::Object(entries) = cell else {
            return Err(PlanValidationError::Cell {
                slot: raw_slot.clone(),
            });
        };
        let mut row = RosterCell::new();
        for (member, code) in entries {
            let code = match code {
                JsonValue::Null => CellCode::Unchanged,
                JsonValue::String(s) => CellCode::from(Some(s.clone())),
                _ => {
                    return Err(PlanValidationError::Code {
                        slot: raw_slot.clone(),
                        member: member.clone(),
                    })
                }
            };
            row.insert(member.clone(), code);
        }
        data.insert(slot_id, row);
    }
    Ok(data)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanIssueKind {
    UnknownSlot,
    NotPermitted { code: String },
    NotAllowedForMember { code: String },
    OverCap { code: String, count: u32, cap: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanIssue {
    pub slot: SlotId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member: Option<String>,
    #[serde(flatten)]
    pub issue: PlanIssueKind,
}

/// Non-fatal review of a grid against the rule table and member allow-lists.
pub fn audit_plan(
    data: &PlanData,
    slots: &[Slot],
    members: &[StoredMember],
    rules: &[ServiceRule],
    holidays: &BTreeSet<NaiveDate>,
) -> Vec<PlanIssue> {
    let slot_times: BTreeMap<&SlotId, &str> = slots.iter().map(|s| (&s.id, s.time.as_str())).collect();
    let allow_lists: BTreeMap<&str, &[String]> = members
        .iter()
        .map(|m| (m.name.as_str(), m.allowed_services.as_slice()))
        .collect();

    let mut issues = Vec::new();
    for (slot_id, cell) in data {
        let assigned = cell
            .iter()
            .filter_map(|(member, code)| code.service().map(|c| (member, c)))
            .collect::<Vec<_>>();
        if assigned.is_empty() {
            continue;
        }

        let Some(time) = slot_times.get(slot_id) else {
            issues.push(PlanIssue {
                slot: slot_id.clone(),
                member: None,
                issue: PlanIssueKind::UnknownSlot,
            });
            continue;
        };
        let matched = rule_for_slot(slot_id.date, time, holidays.contains(&slot_id.date), rules);

        let mut counts: BTreeMap<&str, u32> = BTreeMap::new();
        for (member, code) in assigned {
            *counts.entry(code).or_default() += 1;
            if !matched.permits(code) {
                issues.push(PlanIssue {
                    slot: slot_id.clone(),
                    member: Some(member.clone()),
                    issue: PlanIssueKind::NotPermitted { code: code.to_string() },
                });
            }
            let allowed = allow_lists.get(member.as_str()).copied().unwrap_or_default();
            if !allowed.is_empty() && !allowed.iter().any(|a| a == code) {
                issues.push(PlanIssue {
                    slot: slot_id.clone(),
                    member: Some(member.clone()),
                    issue: PlanIssueKind::NotAllowedForMember { code: code.to_string() },
                });
            }
        }

        for (code, count) in counts {
            if let Some(cap) = matched.cap_for(code).filter(|cap| count > *cap) {
                issues.push(PlanIssue {
                    slot: slot_id.clone(),
                    member: None,
                    issue: PlanIssueKind::OverCap {
                        code: code.to_string(),
                        count,
                        cap,
                    },
                });
            }
        }
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("date")
    }

    fn rule(weekday: RuleWeekday, time: &str, nth: u8, codes: &[&str]) -> ServiceRule {
        ServiceRule {
            id: String::new(),
            weekday,
            time: time.to_string(),
            nth_sunday: nth,
            allowed_services: codes.iter().map(|c| c.to_string()).collect(),
            max_assignments: BTreeMap::new(),
        }
    }

    fn sunday_rules() -> Vec<ServiceRule> {
        vec![
            rule(RuleWeekday::SUNDAY, "09:30", 1, &["🍷", "L", "1", "2", "V"]),
            rule(RuleWeekday::SUNDAY, "09:30", 2, &["L", "1", "2", "BN"]),
            rule(RuleWeekday::WEDNESDAY, "19:00", 0, &["Als"]),
            rule(RuleWeekday::Holiday, "09:30", 0, &["🍷", "L", "1", "2", "V"]),
            rule(RuleWeekday::SUNDAY, "09:30", 1, &["duplicate"]),
        ]
    }

    #[test]
    fn nth_sunday_counts_occurrences_in_month() {
        assert_eq!(nth_sunday(date(2026, 3, 1), false), 1);
        assert_eq!(nth_sunday(date(2026, 3, 8), false), 2);
        assert_eq!(nth_sunday(date(2026, 3, 29), false), 5);
        assert_eq!(nth_sunday(date(2026, 3, 4), false), 0);
        assert_eq!(nth_sunday(date(2026, 3, 1), true), 0);
    }

    #[test]
    fn permitted_services_takes_first_matching_rule_in_order() {
        let rules = sunday_rules();
        assert_eq!(
            permitted_services(date(2026, 3, 1), "09:30", false, &rules),
            ["🍷", "L", "1", "2", "V"]
        );
        assert_eq!(
            permitted_services(date(2026, 3, 8), "9:30", false, &rules),
            ["L", "1", "2", "BN"]
        );
        assert_eq!(permitted_services(date(2026, 3, 4), "19:00", false, &rules), ["Als"]);
        assert_eq!(
            permitted_services(date(2026, 4, 6), "09:30", true, &rules),
            ["🍷", "L", "1", "2", "V"]
        );
        assert_eq!(
            permitted_services(date(2026, 3, 1), "09:30", false, &rules),
            permitted_services(date(2026, 3, 1), "09:30", false, &rules)
        );
    }

    #[test]
    fn unconfigured_slots_permit_any_code() {
        let rules = sunday_rules();
        let matched = rule_for_slot(date(2026, 3, 29), "09:30", false, &rules);
        assert_eq!(matched, RuleMatch::Unconfigured);
        assert!(matched.permits("anything"));
        assert!(permitted_services(date(2026, 3, 29), "09:30", false, &rules).is_empty());

        let matched = rule_for_slot(date(2026, 3, 1), "09:30", false, &rules);
        assert!(matched.permits("V"));
        assert!(!matched.permits("BN"));
    }

    #[test]
    fn als_resolves_differently_on_wednesday() {
        let catalog = ServiceCatalog::default();
        let wednesday = date(2026, 3, 4);
        let sunday = date(2026, 3, 1);
        let wed_id = catalog.resolve_service_id("Als", wednesday).expect("wednesday id");
        let sun_id = catalog.resolve_service_id("Als", sunday).expect("sunday id");
        assert_ne!(wed_id, sun_id);
        assert_eq!(catalog.resolve_service_id("Als", date(2026, 3, 6)), Some(sun_id));
        assert_eq!(catalog.resolve_service_id("unknown", sunday), None);

        for code in catalog.codes.keys() {
            for day in [sunday, wednesday] {
                let id = catalog.resolve_service_id(code, day).expect("known code");
                assert_eq!(catalog.code_for(id, day), Some(code.as_str()), "{code} on {day}");
            }
        }
    }

    #[test]
    fn plan_json_validation_rejects_bad_shapes() {
        let data = validate_plan_json(r#"{"501-2026-03-01": {"Anna Penner": "L", "Paul Wiens": "", "X": null}}"#)
            .expect("valid");
        let cell = &data[&SlotId::new("501", date(2026, 3, 1))];
        assert_eq!(cell["Paul Wiens"], CellCode::Cleared);

        assert!(matches!(validate_plan_json("{nope"), Err(PlanValidationError::Json(_))));
        assert_eq!(validate_plan_value(&json!([1])), Err(PlanValidationError::NotAnObject));
        assert!(matches!(
            validate_plan_value(&json!({"bad-slot": {}})),
            Err(PlanValidationError::SlotId(_))
        ));
        assert_eq!(
            validate_plan_value(&json!({"501-2026-03-01": {"Anna": 3}})),
            Err(PlanValidationError::Code {
                slot: "501-2026-03-01".into(),
                member: "Anna".into()
            })
        );
    }

    #[test]
    fn audit_reports_rule_allow_list_and_cap_issues() {
        let mut rules = sunday_rules();
        rules[0].max_assignments.insert("L".into(), 1);
        let slot_id = SlotId::new("501", date(2026, 3, 1));
        let slots = vec![Slot {
            id: slot_id.clone(),
            starts_at: date(2026, 3, 1)
                .and_hms_opt(9, 30, 0)
                .expect("time")
                .and_utc(),
            time: "09:30".into(),
            label: "Gottesdienst".into(),
            calendar: "Gottesdienst".into(),
            calendar_id: Some(2),
        }];
        let members = vec![StoredMember {
            id: "m1".into(),
            name: "Anna Penner".into(),
            group: "g1".into(),
            role: "Teilnehmer".into(),
            ct_id: Some("77".into()),
            allowed_services: vec!["1".into()],
        }];
        let data = validate_plan_value(&json!({
            "501-2026-03-01": {"Anna Penner": "L", "Paul Wiens": "L", "Viktor Enns": "BN"},
            "999-2026-03-02": {"Paul Wiens": "1"}
        }))
        .expect("data");

        let issues = audit_plan(&data, &slots, &members, &rules, &BTreeSet::new());
        let kinds = issues.iter().map(|i| i.issue.clone()).collect::<Vec<_>>();
        assert!(kinds.contains(&PlanIssueKind::NotPermitted { code: "BN".into() }));
        assert!(kinds.contains(&PlanIssueKind::NotAllowedForMember { code: "L".into() }));
        assert!(kinds.contains(&PlanIssueKind::OverCap {
            code: "L".into(),
            count: 2,
            cap: 1
        }));
        assert!(kinds.contains(&PlanIssueKind::UnknownSlot));
        assert_eq!(issues.len(), 4);
    }
}
