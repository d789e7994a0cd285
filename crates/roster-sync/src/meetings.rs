//! Meeting views: the overview list and one meeting with its protocol and attendance.

use roster_core::{Meeting, MeetingAttendance, ProtocolItem, StoredGroup, StoredMember};
use roster_storage::{Repository, StoreError};
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MeetingsOverview {
    pub groups: Vec<StoredGroup>,
    pub meetings: Vec<Meeting>,
    pub members: Vec<StoredMember>,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeetingDetail {
    pub meeting: Meeting,
    pub items: Vec<ProtocolItem>,
    pub members: Vec<StoredMember>,
    pub attendance: Vec<MeetingAttendance>,
    pub notes: Vec<String>,
}

fn or_empty<T>(result: Result<Vec<T>, StoreError>, what: &str, notes: &mut Vec<String>) -> Vec<T> {
    result.unwrap_or_else(|err| {
        warn!(error = %err, "loading {what} failed");
        notes.push(format!("loading {what} failed: {err}"));
        Vec::new()
    })
}

/// Groups, meetings and members for the overview. Each list degrades to empty on its own.
pub async fn load_meetings_overview(repo: &Repository) -> MeetingsOverview {
    let mut notes = Vec::new();
    let groups = or_empty(repo.groups().await, "groups", &mut notes);
    let meetings = or_empty(repo.meetings().await, "meetings", &mut notes);
    let members = or_empty(repo.members(None).await, "members", &mut notes);
    MeetingsOverview {
        groups,
        meetings,
        members,
        notes,
    }
}

/// One meeting with protocol items in `sort_order`, the members of its group and attendance.
///
/// A missing meeting is `NotFound`. Any other failure reading the meeting yields a placeholder
/// with empty lists.
pub async fn load_meeting(repo: &Repository, id: &str) -> Result<MeetingDetail, StoreError> {
    let meeting = match repo.meeting(id).await {
        Ok(meeting) => meeting,
        Err(err) if err.is_not_found() => return Err(err),
        Err(err) => {
            warn!(error = %err, meeting = id, "loading meeting failed");
            return Ok(MeetingDetail {
                meeting: Meeting::unknown(id),
                items: Vec::new(),
                members: Vec::new(),
                attendance: Vec::new(),
                notes: vec![format!("loading meeting {id} failed: {err}")],
            });
        }
    };

    let mut notes = Vec::new();
    let items = or_empty(repo.protocol_items(id).await, "protocol items", &mut notes);
    let members = or_empty(
        repo.members(meeting.group.as_deref()).await,
        "members",
        &mut notes,
    );
    let attendance = or_empty(repo.meeting_attendance(id).await, "attendance", &mut notes);
    Ok(MeetingDetail {
        meeting,
        items,
        members,
        attendance,
        notes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use roster_storage::records::{
        GROUPS, MEETINGS, MEETING_ATTENDANCE, MEMBERS, PROTOCOL_ITEMS,
    };
    use roster_storage::MemoryStore;
    use serde_json::json;

    async fn seeded() -> (Arc<MemoryStore>, Repository) {
        let store = Arc::new(MemoryStore::new());
        store
            .seed(GROUPS, [json!({"id": "g1", "name": "Prediger", "ct_id": "164"})])
            .await;
        store
            .seed(
                MEMBERS,
                [
                    json!({"id": "m1", "name": "Paul Wiens", "group": "g1", "role": "Teilnehmer"}),
                    json!({"id": "m2", "name": "Anna Penner", "group": "g2", "role": "Teilnehmer"}),
                ],
            )
            .await;
        store
            .seed(
                MEETINGS,
                [
                    json!({"id": "x1", "title": "Brüderstunde", "group": "g1", "created": "2026-02-01 19:00:00.000Z"}),
                    json!({"id": "x2", "title": "Altes Treffen", "created": "2025-11-01 19:00:00.000Z"}),
                ],
            )
            .await;
        store
            .seed(
                PROTOCOL_ITEMS,
                [
                    json!({"id": "p2", "meeting_id": "x1", "sort_order": 2, "text": "Predigtplan"}),
                    json!({"id": "p1", "meeting_id": "x1", "sort_order": 1, "text": "Gebet"}),
                ],
            )
            .await;
        store
            .seed(
                MEETING_ATTENDANCE,
                [json!({"id": "a1", "meeting_id": "x1", "member": "m1", "present": true})],
            )
            .await;
        (store.clone(), Repository::new(store))
    }

    #[tokio::test]
    async fn meeting_detail_is_scoped_to_its_group() {
        let (_store, repo) = seeded().await;

        let detail = load_meeting(&repo, "x1").await.expect("meeting");
        assert_eq!(detail.items.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(), ["p1", "p2"]);
        assert_eq!(detail.members.len(), 1);
        assert_eq!(detail.members[0].id, "m1");
        assert_eq!(detail.attendance.len(), 1);
        assert!(detail.notes.is_empty());

        let legacy = load_meeting(&repo, "x2").await.expect("legacy meeting");
        assert_eq!(legacy.members.len(), 2);
        assert!(legacy.items.is_empty());
    }

    #[tokio::test]
    async fn missing_meeting_is_not_found() {
        let (_store, repo) = seeded().await;
        assert!(load_meeting(&repo, "nope").await.expect_err("missing").is_not_found());
    }

    #[tokio::test]
    async fn unreadable_parts_degrade_to_empty_lists() {
        let (store, repo) = seeded().await;
        store.reject_reads(PROTOCOL_ITEMS).await;
        store.reject_reads(MEMBERS).await;

        let detail = load_meeting(&repo, "x1").await.expect("meeting");
        assert!(detail.items.is_empty());
        assert!(detail.members.is_empty());
        assert_eq!(detail.attendance.len(), 1);
        assert_eq!(detail.notes.len(), 2);

        let overview = load_meetings_overview(&repo).await;
        assert_eq!(overview.meetings.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(), ["x1", "x2"]);
        assert_eq!(overview.groups.len(), 1);
        assert!(overview.members.is_empty());
        assert_eq!(overview.notes.len(), 1);
    }

    #[tokio::test]
    async fn unreadable_meeting_yields_placeholder() {
        let (store, repo) = seeded().await;
        store.reject_reads(MEETINGS).await;

        let detail = load_meeting(&repo, "x1").await.expect("placeholder");
        assert_eq!(detail.meeting.title, "Unbekanntes Meeting");
        assert_eq!(detail.meeting.id, "x1");
        assert!(detail.items.is_empty() && detail.members.is_empty() && detail.attendance.is_empty());
        assert_eq!(detail.notes.len(), 1);
    }
}
