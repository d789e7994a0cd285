//! Roster editor data: slots, preachers and absences for one planning period.

use chrono::{Datelike, Months, NaiveDate};
use roster_core::{Absence, Calendar, RuleWeekday, ServiceRule, Slot};
use roster_directory::DirectoryApi;
use serde::Serialize;
use tracing::warn;

use crate::reconcile::grid_names;
use crate::rules::{nth_sunday, rule_for_slot, slot_weekday};
use crate::RosterRules;

/// First day of the anchor's month through the last day of the following month.
pub fn default_period(anchor: NaiveDate) -> (NaiveDate, NaiveDate) {
    let start = anchor.with_day(1).unwrap_or(anchor);
    let end = start
        .checked_add_months(Months::new(2))
        .and_then(|d| d.pred_opt())
        .unwrap_or(start);
    (start, end)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditorSlot {
    #[serde(flatten)]
    pub slot: Slot,
    pub weekday: RuleWeekday,
    pub nth_sunday: u8,
    pub permitted: Vec<String>,
    /// `false` when no service rule covers the slot.
    pub configured: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Preacher {
    pub person_id: String,
    pub name: String,
    pub role: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditorData {
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub calendars: Vec<Calendar>,
    pub slots: Vec<EditorSlot>,
    pub preachers: Vec<Preacher>,
    pub absences: Vec<Absence>,
    pub notes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EditorData {
    fn empty(period_start: NaiveDate, period_end: NaiveDate) -> Self {
        Self {
            period_start,
            period_end,
            calendars: Vec::new(),
            slots: Vec::new(),
            preachers: Vec::new(),
            absences: Vec::new(),
            notes: Vec::new(),
            error: None,
        }
    }
}

fn annotate(slot: Slot, rules: &RosterRules, service_rules: &[ServiceRule]) -> EditorSlot {
    let date = slot.id.date;
    let holiday = rules.holidays.contains(&date);
    let matched = rule_for_slot(date, &slot.time, holiday, service_rules);
    EditorSlot {
        weekday: slot_weekday(date, holiday),
        nth_sunday: nth_sunday(date, holiday),
        permitted: matched
            .rule()
            .map(|r| r.allowed_services.clone())
            .unwrap_or_default(),
        configured: matched.rule().is_some(),
        slot,
    }
}

/// Never fails: fetch errors surface as `error` (no slots) or `notes` (partial data).
pub async fn load_editor(
    directory: &dyn DirectoryApi,
    rules: &RosterRules,
    service_rules: &[ServiceRule],
    preacher_group_id: &str,
    period_start: NaiveDate,
    period_end: NaiveDate,
) -> EditorData {
    let mut data = EditorData::empty(period_start, period_end);

    let calendars = match directory.calendars().await {
        Ok(calendars) => calendars,
        Err(err) => {
            warn!(error = %err, "loading calendars failed");
            data.error = Some(format!("loading calendars failed: {err}"));
            return data;
        }
    };
    data.calendars = calendars
        .into_iter()
        .filter(|c| rules.calendars.is_relevant(c.id))
        .collect();
    let calendar_ids = data.calendars.iter().map(|c| c.id).collect::<Vec<_>>();

    let mut slots = match directory
        .appointments(period_start, period_end, &calendar_ids)
        .await
    {
        Ok(slots) => slots,
        Err(err) => {
            warn!(error = %err, "loading appointments failed");
            data.error = Some(format!("loading appointments failed: {err}"));
            return data;
        }
    };
    slots.retain(|slot| {
        let weekday = slot.id.date.weekday().num_days_from_sunday();
        slot.calendar_id
            .map_or(true, |id| !rules.calendars.excludes(id, weekday))
    });
    slots.sort_by(|a, b| a.starts_at.cmp(&b.starts_at).then_with(|| a.id.cmp(&b.id)));
    data.slots = slots
        .into_iter()
        .map(|slot| annotate(slot, rules, service_rules))
        .collect();

    match directory.group_members(preacher_group_id).await {
        Ok(members) => {
            data.preachers = grid_names(&members, &rules.name_overrides)
                .into_iter()
                .map(|grid| Preacher {
                    person_id: grid.member.person_id.clone(),
                    name: grid.name,
                    role: rules.roles.label_for(grid.member.group_type_role_id).to_string(),
                    email: grid.member.email.clone(),
                })
                .collect();
        }
        Err(err) => {
            warn!(error = %err, "loading preachers failed");
            data.notes.push(format!("loading preachers failed: {err}"));
        }
    }

    match directory
        .absences(period_start, period_end, Some(preacher_group_id))
        .await
    {
        Ok(absences) => data.absences = absences,
        Err(err) => {
            warn!(error = %err, "loading absences failed");
            data.notes.push(format!("loading absences failed: {err}"));
        }
    }

    data
}
