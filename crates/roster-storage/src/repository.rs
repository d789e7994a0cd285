//! Typed access to the record store collections.

use std::sync::Arc;

use roster_core::{
    Meeting, MeetingAttendance, MemberPatch, NewMember, NewUserAccount, Plan, PlanData,
    ProtocolItem, ServiceRule, StoredGroup, StoredMember, UserAccount, UserPatch,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};

use crate::records::{
    Filter, ListQuery, RecordStore, StoreError, GROUPS, MEETINGS, MEETING_ATTENDANCE, MEMBERS,
    PLANS, PROTOCOL_ITEMS, SERVICE_RULES, USERS,
};

#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn RecordStore>,
}

fn decode<T: DeserializeOwned>(collection: &str, value: JsonValue) -> Result<T, StoreError> {
    serde_json::from_value(value).map_err(|source| StoreError::Decode {
        collection: collection.to_string(),
        source,
    })
}

fn decode_all<T: DeserializeOwned>(
    collection: &str,
    values: Vec<JsonValue>,
) -> Result<Vec<T>, StoreError> {
    values.into_iter().map(|v| decode(collection, v)).collect()
}

fn encode<T: Serialize>(collection: &str, value: &T) -> Result<JsonValue, StoreError> {
    serde_json::to_value(value).map_err(|source| StoreError::Decode {
        collection: collection.to_string(),
        source,
    })
}

impl Repository {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub async fn groups(&self) -> Result<Vec<StoredGroup>, StoreError> {
        let rows = self
            .store
            .list(GROUPS, &ListQuery::all().sorted_by("name"))
            .await?;
        decode_all(GROUPS, rows)
    }

    pub async fn group_by_ct_id(&self, ct_id: &str) -> Result<StoredGroup, StoreError> {
        let row = self.store.get_first(GROUPS, &Filter::eq("ct_id", ct_id)).await?;
        decode(GROUPS, row)
    }

    pub async fn create_group(&self, name: &str, ct_id: &str) -> Result<StoredGroup, StoreError> {
        let row = self
            .store
            .create(GROUPS, &json!({"name": name, "ct_id": ct_id}))
            .await?;
        decode(GROUPS, row)
    }

    pub async fn members_in_group(&self, group_id: &str) -> Result<Vec<StoredMember>, StoreError> {
        let query = ListQuery::filtered(Filter::eq("group", group_id)).sorted_by("name");
        let rows = self.store.list(MEMBERS, &query).await?;
        decode_all(MEMBERS, rows)
    }

    /// Members of `group_id`, or of every group when `None`.
    pub async fn members(&self, group_id: Option<&str>) -> Result<Vec<StoredMember>, StoreError> {
        let query = match group_id {
            Some(id) => ListQuery::filtered(Filter::eq("group", id)),
            None => ListQuery::all(),
        };
        let rows = self.store.list(MEMBERS, &query.sorted_by("name")).await?;
        decode_all(MEMBERS, rows)
    }

    /// Natural-key lookup: `(name, group)`.
    pub async fn find_member(&self, name: &str, group_id: &str) -> Result<StoredMember, StoreError> {
        let filter = Filter::eq("name", name).and_eq("group", group_id);
        let row = self.store.get_first(MEMBERS, &filter).await?;
        decode(MEMBERS, row)
    }

    pub async fn create_member(&self, member: &NewMember) -> Result<StoredMember, StoreError> {
        let row = self.store.create(MEMBERS, &encode(MEMBERS, member)?).await?;
        decode(MEMBERS, row)
    }

    pub async fn update_member(&self, id: &str, patch: &MemberPatch) -> Result<StoredMember, StoreError> {
        let row = self
            .store
            .update(MEMBERS, id, &encode(MEMBERS, patch)?)
            .await?;
        decode(MEMBERS, row)
    }

    pub async fn delete_member(&self, id: &str) -> Result<(), StoreError> {
        self.store.delete(MEMBERS, id).await
    }

    pub async fn service_rules(&self) -> Result<Vec<ServiceRule>, StoreError> {
        let rows = self
            .store
            .list(SERVICE_RULES, &ListQuery::all().sorted_by("weekday,time"))
            .await?;
        decode_all(SERVICE_RULES, rows)
    }

    pub async fn create_service_rule(&self, rule: &ServiceRule) -> Result<ServiceRule, StoreError> {
        let row = self
            .store
            .create(SERVICE_RULES, &encode(SERVICE_RULES, rule)?)
            .await?;
        decode(SERVICE_RULES, row)
    }

    pub async fn plans(&self) -> Result<Vec<Plan>, StoreError> {
        let rows = self
            .store
            .list(PLANS, &ListQuery::all().sorted_by("-period_start"))
            .await?;
        decode_all(PLANS, rows)
    }

    pub async fn plan(&self, id: &str) -> Result<Plan, StoreError> {
        let row = self.store.get_one(PLANS, id).await?;
        decode(PLANS, row)
    }

    pub async fn create_plan(&self, plan: &Plan) -> Result<Plan, StoreError> {
        let row = self.store.create(PLANS, &encode(PLANS, plan)?).await?;
        decode(PLANS, row)
    }

    pub async fn save_plan(
        &self,
        id: &str,
        data: &PlanData,
        formatting: &JsonValue,
    ) -> Result<Plan, StoreError> {
        let body = json!({
            "data": encode(PLANS, data)?,
            "formatting": formatting,
        });
        let row = self.store.update(PLANS, id, &body).await?;
        decode(PLANS, row)
    }

    pub async fn set_plan_status(&self, id: &str, status: &str) -> Result<Plan, StoreError> {
        let row = self
            .store
            .update(PLANS, id, &json!({"status": status}))
            .await?;
        decode(PLANS, row)
    }

    pub async fn delete_plan(&self, id: &str) -> Result<(), StoreError> {
        self.store.delete(PLANS, id).await
    }

    /// Newest first.
    pub async fn meetings(&self) -> Result<Vec<Meeting>, StoreError> {
        let rows = self
            .store
            .list(MEETINGS, &ListQuery::all().sorted_by("-created"))
            .await?;
        decode_all(MEETINGS, rows)
    }

    pub async fn meeting(&self, id: &str) -> Result<Meeting, StoreError> {
        let row = self.store.get_one(MEETINGS, id).await?;
        decode(MEETINGS, row)
    }

    pub async fn protocol_items(&self, meeting_id: &str) -> Result<Vec<ProtocolItem>, StoreError> {
        let query = ListQuery::filtered(Filter::eq("meeting_id", meeting_id)).sorted_by("sort_order");
        let rows = self.store.list(PROTOCOL_ITEMS, &query).await?;
        decode_all(PROTOCOL_ITEMS, rows)
    }

    pub async fn meeting_attendance(
        &self,
        meeting_id: &str,
    ) -> Result<Vec<MeetingAttendance>, StoreError> {
        let query = ListQuery::filtered(Filter::eq("meeting_id", meeting_id));
        let rows = self.store.list(MEETING_ATTENDANCE, &query).await?;
        decode_all(MEETING_ATTENDANCE, rows)
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<UserAccount, StoreError> {
        let row = self.store.get_first(USERS, &Filter::eq("email", email)).await?;
        decode(USERS, row)
    }

    pub async fn create_user(&self, user: &NewUserAccount) -> Result<UserAccount, StoreError> {
        let row = self.store.create(USERS, &encode(USERS, user)?).await?;
        decode(USERS, row)
    }

    pub async fn update_user(&self, id: &str, patch: &UserPatch) -> Result<UserAccount, StoreError> {
        let row = self.store.update(USERS, id, &encode(USERS, patch)?).await?;
        decode(USERS, row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    fn repo() -> (Arc<MemoryStore>, Repository) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), Repository::new(store))
    }

    #[tokio::test]
    async fn member_natural_key_lookup_is_scoped_to_group() {
        let (store, repo) = repo();
        store
            .seed(
                MEMBERS,
                [
                    json!({"id": "m1", "name": "Anna Penner", "group": "g1", "role": "Leiter", "ct_id": "", "allowed_services": null}),
                    json!({"id": "m2", "name": "Anna Penner", "group": "g2", "role": "Teilnehmer", "ct_id": "77", "allowed_services": ["L"]}),
                ],
            )
            .await;

        let found = repo.find_member("Anna Penner", "g2").await.expect("member");
        assert_eq!(found.id, "m2");
        assert_eq!(found.allowed_services, vec!["L".to_string()]);
        assert!(repo
            .find_member("Anna Penner", "g3")
            .await
            .expect_err("other group")
            .is_not_found());
    }

    #[tokio::test]
    async fn member_patch_only_touches_given_fields() {
        let (_store, repo) = repo();
        let created = repo
            .create_member(&NewMember {
                name: "Paul Wiens".into(),
                group: "g1".into(),
                role: "Teilnehmer".into(),
                ct_id: String::new(),
                allowed_services: vec!["1".into()],
            })
            .await
            .expect("create");
        assert_eq!(created.ct_id, None);

        let updated = repo
            .update_member(
                &created.id,
                &MemberPatch {
                    role: None,
                    ct_id: Some("42".into()),
                },
            )
            .await
            .expect("update");
        assert_eq!(updated.ct_id.as_deref(), Some("42"));
        assert_eq!(updated.role, "Teilnehmer");
        assert_eq!(updated.allowed_services, vec!["1".to_string()]);
    }

    #[tokio::test]
    async fn plans_sort_newest_period_first() {
        let (store, repo) = repo();
        store
            .seed(
                PLANS,
                [
                    json!({"id": "a", "period_start": "2026-01-01", "period_end": "2026-02-28", "data": null}),
                    json!({"id": "b", "period_start": "2026-03-01", "period_end": "2026-04-30", "data": {}}),
                ],
            )
            .await;
        let plans = repo.plans().await.expect("plans");
        assert_eq!(plans.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(), ["b", "a"]);
        assert!(plans.iter().all(|p| p.status == "draft"));
    }

    #[tokio::test]
    async fn meeting_protocol_follows_sort_order_and_meeting() {
        let (store, repo) = repo();
        store
            .seed(
                MEETINGS,
                [
                    json!({"id": "x1", "title": "Januar", "created": "2026-01-10 09:00:00.000Z"}),
                    json!({"id": "x2", "title": "Februar", "group": "g1", "created": "2026-02-10 09:00:00.000Z"}),
                ],
            )
            .await;
        store
            .seed(
                PROTOCOL_ITEMS,
                [
                    json!({"id": "p2", "meeting_id": "x2", "sort_order": 2}),
                    json!({"id": "p1", "meeting_id": "x2", "sort_order": 1}),
                    json!({"id": "p9", "meeting_id": "x1", "sort_order": 0}),
                ],
            )
            .await;

        let meetings = repo.meetings().await.expect("meetings");
        assert_eq!(meetings.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(), ["x2", "x1"]);
        assert_eq!(meetings[0].group.as_deref(), Some("g1"));

        let items = repo.protocol_items("x2").await.expect("items");
        assert_eq!(items.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(), ["p1", "p2"]);
        assert!(repo.meeting("x7").await.expect_err("missing").is_not_found());
    }

    #[tokio::test]
    async fn members_without_group_filter_span_all_groups() {
        let (store, repo) = repo();
        store
            .seed(
                MEMBERS,
                [
                    json!({"id": "m1", "name": "Paul Wiens", "group": "g1", "role": "Teilnehmer"}),
                    json!({"id": "m2", "name": "Anna Penner", "group": "g2", "role": "Teilnehmer"}),
                ],
            )
            .await;

        let all = repo.members(None).await.expect("all");
        assert_eq!(all.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(), ["m2", "m1"]);
        assert_eq!(repo.members(Some("g1")).await.expect("g1").len(), 1);
    }
}
