//! Two-phase export of a saved roster grid into directory bookings.
//!
//! `plan_export` reads current bookings and computes every pending mutation up front.
//! The intent is journaled before `apply_intent` touches the directory, and results are
//! journaled next to it, so an interrupted export can be inspected and resumed.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use roster_core::{Booking, BookingStatus, CellCode, Plan, PlanData, SlotId, StoredMember};
use roster_directory::DirectoryApi;
use roster_storage::IntentJournal;
use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn, Instrument};

use crate::rules::ServiceCatalog;

pub const INTENT_KIND: &str = "intent";
pub const RESULTS_KIND: &str = "results";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepAction {
    /// Remove a booking of a cleared cell.
    Clear { booking_id: String },
    /// Remove a booking for another service; failure blocks the create that follows.
    Replace { booking_id: String, service_id: i64 },
    Create { code: String, service_id: i64 },
    Confirm { code: String, service_id: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportStep {
    pub slot: SlotId,
    pub member: String,
    pub person_id: String,
    #[serde(flatten)]
    pub action: StepAction,
}

impl ExportStep {
    pub fn event_id(&self) -> &str {
        &self.slot.event_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExportOutcome {
    Created { service_id: i64 },
    Confirmed { service_id: i64 },
    Deleted { booking_id: String },
    Unchanged,
    Skipped { reason: String },
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportResult {
    pub slot: SlotId,
    pub member: String,
    #[serde(flatten)]
    pub outcome: ExportOutcome,
}

/// Full diff of one export run, computed before any mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportIntent {
    pub plan_id: String,
    pub created_at: DateTime<Utc>,
    pub steps: Vec<ExportStep>,
    /// Cells already decided without a directory mutation.
    pub settled: Vec<ExportResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    pub created: usize,
    pub confirmed: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl ExportSummary {
    pub fn from_results(results: &[ExportResult]) -> Self {
        let mut summary = Self::default();
        for result in results {
            match result.outcome {
                ExportOutcome::Created { .. } => summary.created += 1,
                ExportOutcome::Confirmed { .. } => summary.confirmed += 1,
                ExportOutcome::Deleted { .. } => summary.deleted += 1,
                ExportOutcome::Unchanged => summary.unchanged += 1,
                ExportOutcome::Skipped { .. } => summary.skipped += 1,
                ExportOutcome::Error { .. } => summary.errors += 1,
            }
        }
        summary
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportReport {
    pub plan_id: String,
    pub intent_path: PathBuf,
    pub results_path: PathBuf,
    pub summary: ExportSummary,
    pub results: Vec<ExportResult>,
}

fn settle(slot: &SlotId, member: &str, outcome: ExportOutcome) -> ExportResult {
    ExportResult {
        slot: slot.clone(),
        member: member.to_string(),
        outcome,
    }
}

/// Computes the export intent for a grid. Bookings are fetched once per event.
pub async fn plan_export(
    plan_id: &str,
    data: &PlanData,
    members: &[StoredMember],
    catalog: &ServiceCatalog,
    directory: &dyn DirectoryApi,
) -> ExportIntent {
    let mut person_ids: BTreeMap<&str, Option<&str>> = BTreeMap::new();
    for member in members {
        person_ids
            .entry(member.name.as_str())
            .or_insert(member.ct_id.as_deref());
    }

    let mut intent = ExportIntent {
        plan_id: plan_id.to_string(),
        created_at: Utc::now(),
        steps: Vec::new(),
        settled: Vec::new(),
    };
    let mut bookings_by_event: BTreeMap<String, Result<Vec<Booking>, String>> = BTreeMap::new();

    for (slot, cell) in data {
        for (member, code) in cell {
            if *code == CellCode::Unchanged {
                continue;
            }
            let Some(person_id) = person_ids.get(member.as_str()).copied().flatten() else {
                intent.settled.push(settle(
                    slot,
                    member,
                    ExportOutcome::Skipped {
                        reason: "no external id".to_string(),
                    },
                ));
                continue;
            };

            if !bookings_by_event.contains_key(&slot.event_id) {
                let fetched = directory
                    .event_bookings(&slot.event_id)
                    .await
                    .map_err(|err| err.to_string());
                if let Err(message) = &fetched {
                    warn!(event_id = %slot.event_id, error = %message, "could not read bookings");
                }
                bookings_by_event.insert(slot.event_id.clone(), fetched);
            }
            let bookings = match bookings_by_event.get(&slot.event_id) {
                Some(Ok(bookings)) => bookings,
                Some(Err(message)) => {
                    intent.settled.push(settle(
                        slot,
                        member,
                        ExportOutcome::Error {
                            message: format!("reading bookings failed: {message}"),
                        },
                    ));
                    continue;
                }
                None => continue,
            };
            let held = bookings
                .iter()
                .filter(|b| b.person_id == person_id)
                .collect::<Vec<_>>();

            let step = |action| ExportStep {
                slot: slot.clone(),
                member: member.clone(),
                person_id: person_id.to_string(),
                action,
            };

            match code {
                CellCode::Unchanged => {}
                CellCode::Cleared => {
                    if held.is_empty() {
                        intent.settled.push(settle(slot, member, ExportOutcome::Unchanged));
                    }
                    for booking in held {
                        intent.steps.push(step(StepAction::Clear {
                            booking_id: booking.id.clone(),
                        }));
                    }
                }
                CellCode::Service(code) => {
                    let Some(service_id) = catalog.resolve_service_id(code, slot.date) else {
                        intent.settled.push(settle(
                            slot,
                            member,
                            ExportOutcome::Skipped {
                                reason: format!("unknown service code {code:?}"),
                            },
                        ));
                        continue;
                    };

                    for other in held.iter().filter(|b| b.service_id != service_id) {
                        intent.steps.push(step(StepAction::Replace {
                            booking_id: other.id.clone(),
                            service_id: other.service_id,
                        }));
                    }
                    match held.iter().find(|b| b.service_id == service_id) {
                        Some(b) if b.status == BookingStatus::Confirmed => {
                            intent.settled.push(settle(slot, member, ExportOutcome::Unchanged));
                        }
                        Some(_) => intent.steps.push(step(StepAction::Confirm {
                            code: code.clone(),
                            service_id,
                        })),
                        None => intent.steps.push(step(StepAction::Create {
                            code: code.clone(),
                            service_id,
                        })),
                    }
                }
            }
        }
    }

    info!(
        plan_id,
        steps = intent.steps.len(),
        settled = intent.settled.len(),
        events = bookings_by_event.len(),
        "export intent computed"
    );
    intent
}

/// Executes every step sequentially; individual failures become `Error` results.
pub async fn apply_intent(intent: &ExportIntent, directory: &dyn DirectoryApi) -> Vec<ExportResult> {
    let mut results = intent.settled.clone();
    let mut blocked: BTreeSet<(SlotId, String)> = BTreeSet::new();

    for step in &intent.steps {
        let key = (step.slot.clone(), step.person_id.clone());
        let outcome = match &step.action {
            StepAction::Clear { booking_id } => {
                match directory.delete_assignment(step.event_id(), booking_id).await {
                    Ok(()) => ExportOutcome::Deleted {
                        booking_id: booking_id.clone(),
                    },
                    Err(err) => ExportOutcome::Error {
                        message: err.to_string(),
                    },
                }
            }
            StepAction::Replace { booking_id, .. } => {
                match directory.delete_assignment(step.event_id(), booking_id).await {
                    Ok(()) => ExportOutcome::Deleted {
                        booking_id: booking_id.clone(),
                    },
                    Err(err) => {
                        blocked.insert(key);
                        ExportOutcome::Error {
                            message: err.to_string(),
                        }
                    }
                }
            }
            StepAction::Create { service_id, .. } if blocked.contains(&key) => ExportOutcome::Skipped {
                reason: format!("previous booking could not be removed; service {service_id} not booked"),
            },
            StepAction::Create { service_id, .. } => match directory
                .set_assignment(step.event_id(), *service_id, &step.person_id, BookingStatus::Confirmed)
                .await
            {
                Ok(()) => ExportOutcome::Created {
                    service_id: *service_id,
                },
                Err(err) => ExportOutcome::Error {
                    message: err.to_string(),
                },
            },
            StepAction::Confirm { service_id, .. } => match directory
                .set_assignment(step.event_id(), *service_id, &step.person_id, BookingStatus::Confirmed)
                .await
            {
                Ok(()) => ExportOutcome::Confirmed {
                    service_id: *service_id,
                },
                Err(err) => ExportOutcome::Error {
                    message: err.to_string(),
                },
            },
        };

        if let ExportOutcome::Error { message } = &outcome {
            warn!(slot = %step.slot, member = %step.member, error = %message, "export step failed");
        }
        results.push(ExportResult {
            slot: step.slot.clone(),
            member: step.member.clone(),
            outcome,
        });
    }
    results
}

async fn journal_and_apply(
    journal: &IntentJournal,
    intent: &ExportIntent,
    intent_path: PathBuf,
    directory: &dyn DirectoryApi,
) -> anyhow::Result<ExportReport> {
    let results = apply_intent(intent, directory).await;
    let results_entry = journal
        .write_json(Utc::now(), &intent.plan_id, RESULTS_KIND, &results)
        .await
        .context("journaling export results")?;
    let summary = ExportSummary::from_results(&results);
    info!(plan_id = %intent.plan_id, ?summary, "export finished");
    Ok(ExportReport {
        plan_id: intent.plan_id.clone(),
        intent_path,
        results_path: results_entry.relative_path,
        summary,
        results,
    })
}

/// Plans, journals and applies the export of a stored plan.
pub async fn export_plan(
    journal: &IntentJournal,
    plan: &Plan,
    members: &[StoredMember],
    catalog: &ServiceCatalog,
    directory: &dyn DirectoryApi,
) -> anyhow::Result<ExportReport> {
    let span = info_span!("export_plan", plan_id = %plan.id);
    async {
        let intent = plan_export(&plan.id, &plan.data, members, catalog, directory).await;
        let entry = journal
            .write_json(intent.created_at, &plan.id, INTENT_KIND, &intent)
            .await
            .context("journaling export intent")?;
        journal_and_apply(journal, &intent, entry.relative_path, directory).await
    }
    .instrument(span)
    .await
}

/// Re-applies a journaled intent, dropping steps the directory already reflects.
pub async fn resume_intent(
    journal: &IntentJournal,
    intent_path: &Path,
    directory: &dyn DirectoryApi,
) -> anyhow::Result<ExportReport> {
    let mut intent: ExportIntent = journal.read_json(intent_path).await?;
    let events = intent
        .steps
        .iter()
        .map(|s| s.event_id().to_string())
        .collect::<BTreeSet<_>>();

    let mut current: BTreeMap<String, Vec<Booking>> = BTreeMap::new();
    for event_id in events {
        match directory.event_bookings(&event_id).await {
            Ok(bookings) => {
                current.insert(event_id, bookings);
            }
            Err(err) => warn!(%event_id, error = %err, "resuming without current bookings"),
        }
    }

    let mut pending = Vec::new();
    for step in std::mem::take(&mut intent.steps) {
        let Some(bookings) = current.get(step.event_id()) else {
            pending.push(step);
            continue;
        };
        let done = match &step.action {
            StepAction::Clear { booking_id } | StepAction::Replace { booking_id, .. } => {
                !bookings.iter().any(|b| &b.id == booking_id)
            }
            StepAction::Create { service_id, .. } | StepAction::Confirm { service_id, .. } => {
                bookings.iter().any(|b| {
                    b.person_id == step.person_id
                        && b.service_id == *service_id
                        && b.status == BookingStatus::Confirmed
                })
            }
        };
        if done {
            intent.settled.push(settle(&step.slot, &step.member, ExportOutcome::Unchanged));
        } else {
            pending.push(step);
        }
    }
    intent.steps = pending;
    info!(plan_id = %intent.plan_id, pending = intent.steps.len(), "resuming export intent");

    journal_and_apply(journal, &intent, intent_path.to_path_buf(), directory).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use roster_directory::{DirectoryCall, DirectoryFixture, FixtureDirectory};
    use serde_json::json;
    use tempfile::tempdir;

    fn slot(event: &str, day: u32) -> SlotId {
        SlotId::new(event, NaiveDate::from_ymd_opt(2026, 3, day).expect("date"))
    }

    fn member(name: &str, ct_id: Option<&str>) -> StoredMember {
        StoredMember {
            id: format!("m-{name}"),
            name: name.into(),
            group: "g1".into(),
            role: "Teilnehmer".into(),
            ct_id: ct_id.map(str::to_string),
            allowed_services: Vec::new(),
        }
    }

    fn directory(bookings: serde_json::Value) -> FixtureDirectory {
        let fixture: DirectoryFixture =
            serde_json::from_value(json!({ "bookings": bookings })).expect("fixture");
        FixtureDirectory::new(fixture)
    }

    fn grid(entries: &[(SlotId, &str, CellCode)]) -> PlanData {
        let mut data = PlanData::new();
        for (slot, name, code) in entries {
            data.entry(slot.clone())
                .or_default()
                .insert(name.to_string(), code.clone());
        }
        data
    }

    #[tokio::test]
    async fn cleared_cell_with_one_booking_deletes_once() {
        let dir = directory(json!({"501": [{"id": 700, "personId": 5, "serviceId": 11, "statusId": 2}]}));
        let data = grid(&[(slot("501", 1), "Paul Wiens", CellCode::Cleared)]);
        let members = [member("Paul Wiens", Some("5"))];

        let intent = plan_export("p1", &data, &members, &ServiceCatalog::default(), &dir).await;
        let results = apply_intent(&intent, &dir).await;

        assert_eq!(
            dir.mutations().await,
            vec![DirectoryCall::DeleteAssignment {
                event_id: "501".into(),
                booking_id: "700".into()
            }]
        );
        assert_eq!(ExportSummary::from_results(&results).deleted, 1);
    }

    #[tokio::test]
    async fn new_code_without_bookings_creates_one_confirmed_booking() {
        let dir = directory(json!({}));
        let data = grid(&[(slot("501", 1), "Anna Penner", CellCode::Service("1".into()))]);
        let members = [member("Anna Penner", Some("77"))];

        let intent = plan_export("p1", &data, &members, &ServiceCatalog::default(), &dir).await;
        let results = apply_intent(&intent, &dir).await;

        assert_eq!(
            dir.mutations().await,
            vec![DirectoryCall::SetAssignment {
                event_id: "501".into(),
                service_id: 12,
                person_id: "77".into(),
                status: BookingStatus::Confirmed
            }]
        );
        assert_eq!(results[0].outcome, ExportOutcome::Created { service_id: 12 });
    }

    #[tokio::test]
    async fn reassignment_deletes_other_service_before_create() {
        let dir = directory(json!({"501": [
            {"id": 700, "personId": 5, "serviceId": 11, "statusId": 2},
            {"id": 701, "personId": 77, "serviceId": 12, "statusId": 1}
        ]}));
        let data = grid(&[
            (slot("501", 1), "Paul Wiens", CellCode::Service("2".into())),
            (slot("501", 1), "Anna Penner", CellCode::Service("1".into())),
        ]);
        let members = [member("Paul Wiens", Some("5")), member("Anna Penner", Some("77"))];

        let intent = plan_export("p1", &data, &members, &ServiceCatalog::default(), &dir).await;
        let results = apply_intent(&intent, &dir).await;
        let summary = ExportSummary::from_results(&results);
        assert_eq!((summary.deleted, summary.created, summary.confirmed), (1, 1, 1));

        let mutations = dir.mutations().await;
        let delete_at = mutations
            .iter()
            .position(|c| matches!(c, DirectoryCall::DeleteAssignment { booking_id, .. } if booking_id == "700"))
            .expect("delete");
        let create_at = mutations
            .iter()
            .position(|c| matches!(c, DirectoryCall::SetAssignment { service_id: 13, .. }))
            .expect("create");
        assert!(delete_at < create_at);
    }

    #[tokio::test]
    async fn failed_replace_blocks_create_but_not_other_cells() {
        let dir = directory(json!({"501": [
            {"id": 700, "personId": 5, "serviceId": 11, "statusId": 2},
            {"id": 702, "personId": 19, "serviceId": 11, "statusId": 2},
            {"id": 703, "personId": 19, "serviceId": 14, "statusId": 2}
        ]}));
        dir.fail_call(DirectoryCall::DeleteAssignment {
            event_id: "501".into(),
            booking_id: "700".into(),
        })
        .await;
        dir.fail_call(DirectoryCall::DeleteAssignment {
            event_id: "501".into(),
            booking_id: "702".into(),
        })
        .await;
        let data = grid(&[
            (slot("501", 1), "Paul Wiens", CellCode::Service("2".into())),
            (slot("501", 1), "Viktor Enns (Jun.)", CellCode::Cleared),
            (slot("501", 1), "Nobody", CellCode::Service("1".into())),
            (slot("501", 1), "Maria Dyck", CellCode::Service("??".into())),
        ]);
        let members = [
            member("Paul Wiens", Some("5")),
            member("Viktor Enns (Jun.)", Some("19")),
            member("Nobody", None),
            member("Maria Dyck", Some("8")),
        ];

        let intent = plan_export("p1", &data, &members, &ServiceCatalog::default(), &dir).await;
        let results = apply_intent(&intent, &dir).await;

        let outcome_for = |name: &str| {
            results
                .iter()
                .filter(|r| r.member == name)
                .map(|r| r.outcome.clone())
                .collect::<Vec<_>>()
        };
        let paul = outcome_for("Paul Wiens");
        assert!(matches!(paul[0], ExportOutcome::Error { .. }));
        assert!(matches!(paul[1], ExportOutcome::Skipped { .. }));

        let viktor = outcome_for("Viktor Enns (Jun.)");
        assert!(matches!(viktor[0], ExportOutcome::Error { .. }));
        assert_eq!(viktor[1], ExportOutcome::Deleted { booking_id: "703".into() });

        assert_eq!(
            outcome_for("Nobody"),
            [ExportOutcome::Skipped { reason: "no external id".into() }]
        );
        assert!(matches!(outcome_for("Maria Dyck")[0], ExportOutcome::Skipped { .. }));
        assert_eq!(dir.calls().await.iter().filter(|c| matches!(c, DirectoryCall::EventBookings(_))).count(), 1);
    }

    #[tokio::test]
    async fn confirmed_booking_for_same_service_is_unchanged() {
        let dir = directory(json!({"501": [{"id": 700, "personId": 5, "serviceId": 11, "statusId": 2}]}));
        let data = grid(&[(slot("501", 1), "Paul Wiens", CellCode::Service("L".into()))]);
        let members = [member("Paul Wiens", Some("5"))];

        let intent = plan_export("p1", &data, &members, &ServiceCatalog::default(), &dir).await;
        assert!(intent.steps.is_empty());
        assert_eq!(intent.settled[0].outcome, ExportOutcome::Unchanged);
    }

    #[tokio::test]
    async fn export_journals_intent_and_resume_skips_applied_steps() {
        let tmp = tempdir().expect("tempdir");
        let journal = IntentJournal::new(tmp.path());
        let dir = directory(json!({"501": [{"id": 700, "personId": 5, "serviceId": 11, "statusId": 2}]}));
        let plan = Plan {
            id: "plan-1".into(),
            period_start: "2026-03-01".into(),
            period_end: "2026-04-30".into(),
            data: grid(&[
                (slot("501", 1), "Paul Wiens", CellCode::Cleared),
                (slot("501", 1), "Anna Penner", CellCode::Service("1".into())),
            ]),
            formatting: serde_json::Value::Null,
            status: "draft".into(),
            updated: None,
        };
        let members = [member("Paul Wiens", Some("5")), member("Anna Penner", Some("77"))];

        let report = export_plan(&journal, &plan, &members, &ServiceCatalog::default(), &dir)
            .await
            .expect("export");
        assert_eq!(report.summary.deleted, 1);
        assert_eq!(report.summary.created, 1);
        assert!(tmp.path().join(&report.intent_path).exists());
        assert!(tmp.path().join(&report.results_path).exists());

        let resumed = resume_intent(&journal, &report.intent_path, &dir)
            .await
            .expect("resume");
        assert_eq!(resumed.summary.unchanged, 2);
        assert_eq!(dir.mutations().await.len(), 2);
    }
}
