//! Member sync pipeline, deployment configuration and the roster engines.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use roster_core::{
    DirectoryMember, RuleWeekday, ServiceRule, StoredGroup, StoredMember, UserAccount, DEFAULT_ROLE,
};
use roster_directory::{ChurchDirectoryClient, DirectoryApi};
use roster_storage::{HttpClientConfig, PocketBaseStore, Repository, StoreError};
use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub mod editor;
pub mod export;
pub mod meetings;
pub mod reconcile;
pub mod rules;

pub use editor::{default_period, load_editor, EditorData};
pub use export::{export_plan, resume_intent, ExportReport};
pub use meetings::{load_meeting, load_meetings_overview, MeetingDetail, MeetingsOverview};
pub use reconcile::{plan_user_accounts, reconcile, MemberOperation, UserOperation};
pub use rules::{normalize_clock, permitted_services, ServiceCatalog};

pub const CRATE_NAME: &str = "roster-sync";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub churchtools_base_url: Option<String>,
    pub churchtools_token: Option<String>,
    pub pocketbase_url: String,
    pub pb_admin_email: Option<String>,
    pub pb_admin_password: Option<String>,
    pub preacher_group_id: String,
    pub rules_path: PathBuf,
    pub journal_dir: PathBuf,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub web_port: u16,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Self {
            churchtools_base_url: non_empty("CHURCHTOOLS_BASE_URL"),
            churchtools_token: non_empty("CHURCHTOOLS_TOKEN"),
            pocketbase_url: non_empty("POCKETBASE_URL")
                .unwrap_or_else(|| "http://127.0.0.1:8090".to_string()),
            pb_admin_email: non_empty("PB_ADMIN_EMAIL"),
            pb_admin_password: non_empty("PB_ADMIN_PASSWORD").map(|v| {
                v.strip_prefix('\'')
                    .and_then(|v| v.strip_suffix('\''))
                    .map(str::to_string)
                    .unwrap_or(v)
            }),
            preacher_group_id: non_empty("PREACHER_GROUP_ID").unwrap_or_else(|| "164".to_string()),
            rules_path: non_empty("ROSTER_RULES_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("rules/roster.yaml")),
            journal_dir: non_empty("ROSTER_JOURNAL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./journal")),
            http_timeout_secs: non_empty("ROSTER_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            user_agent: non_empty("ROSTER_USER_AGENT")
                .unwrap_or_else(|| "church-roster-sync/0.1".to_string()),
            web_port: non_empty("ROSTER_WEB_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(8000),
        }
    }

    pub fn http_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            ..Default::default()
        }
    }

    pub fn connect_directory(&self) -> Result<ChurchDirectoryClient> {
        let base_url = self
            .churchtools_base_url
            .as_deref()
            .context("CHURCHTOOLS_BASE_URL is not set")?;
        let token = self
            .churchtools_token
            .as_deref()
            .context("CHURCHTOOLS_TOKEN is not set")?;
        ChurchDirectoryClient::new(base_url, token, &self.http_config())
    }

    pub async fn connect_store(&self) -> Result<Repository> {
        let email = self
            .pb_admin_email
            .as_deref()
            .context("PB_ADMIN_EMAIL is not set")?;
        let password = self
            .pb_admin_password
            .as_deref()
            .context("PB_ADMIN_PASSWORD is not set")?;
        let store = PocketBaseStore::connect(&self.pocketbase_url, email, password, &self.http_config())
            .await
            .with_context(|| format!("connecting to record store at {}", self.pocketbase_url))?;
        Ok(Repository::new(Arc::new(store)))
    }

    /// Deployment tables; a missing file falls back to the built-in defaults.
    pub fn load_rules(&self) -> Result<RosterRules> {
        if !self.rules_path.exists() {
            warn!(path = %self.rules_path.display(), "rules file missing; using built-in defaults");
            return Ok(RosterRules::default());
        }
        RosterRules::from_path(&self.rules_path)
    }
}

/// Directory role id -> grid role label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleMap {
    pub labels: BTreeMap<i64, String>,
    #[serde(default = "default_role_label")]
    pub default_role: String,
}

fn default_role_label() -> String {
    DEFAULT_ROLE.to_string()
}

impl Default for RoleMap {
    fn default() -> Self {
        Self {
            labels: [(9, "Leiter"), (8, "Teilnehmer"), (42, "Teilnehmer 2")]
                .into_iter()
                .map(|(id, label)| (id, label.to_string()))
                .collect(),
            default_role: default_role_label(),
        }
    }
}

impl RoleMap {
    pub fn label_for(&self, role_id: i64) -> &str {
        self.labels
            .get(&role_id)
            .map(String::as_str)
            .unwrap_or(&self.default_role)
    }

    pub fn is_mapped(&self, role_id: i64) -> bool {
        self.labels.contains_key(&role_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarFilter {
    /// Empty keeps every calendar.
    #[serde(default)]
    pub relevant_ids: Vec<i64>,
    /// Calendar id -> weekdays (0 = Sunday) whose slots are dropped.
    #[serde(default)]
    pub excluded_weekdays: BTreeMap<i64, Vec<u8>>,
}

impl CalendarFilter {
    pub fn is_relevant(&self, calendar_id: i64) -> bool {
        self.relevant_ids.is_empty() || self.relevant_ids.contains(&calendar_id)
    }

    pub fn excludes(&self, calendar_id: i64, weekday: u32) -> bool {
        self.excluded_weekdays
            .get(&calendar_id)
            .is_some_and(|days| days.iter().any(|d| u32::from(*d) == weekday))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSeed {
    pub name: String,
    pub ct_id: String,
}

/// Per-deployment tables loaded from `rules/roster.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RosterRules {
    pub version: u32,
    /// Directory person id -> suffix used when display names collide.
    pub name_overrides: BTreeMap<String, String>,
    pub roles: RoleMap,
    /// Role ids provisioned as app admins.
    pub leader_role_ids: Vec<i64>,
    pub services: ServiceCatalog,
    pub default_rules: Vec<ServiceRule>,
    pub calendars: CalendarFilter,
    pub holidays: BTreeSet<NaiveDate>,
    pub ensure_groups: Vec<GroupSeed>,
}

impl Default for RosterRules {
    fn default() -> Self {
        Self {
            version: 1,
            name_overrides: BTreeMap::new(),
            roles: RoleMap::default(),
            leader_role_ids: vec![9],
            services: ServiceCatalog::default(),
            default_rules: Vec::new(),
            calendars: CalendarFilter::default(),
            holidays: BTreeSet::new(),
            ensure_groups: Vec::new(),
        }
    }
}

impl RosterRules {
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parsing roster rules")
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("loading {}", path.display()))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupSyncSummary {
    pub group: String,
    pub directory_members: usize,
    pub operations: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub groups: Vec<GroupSyncSummary>,
    pub members_created: usize,
    pub members_updated: usize,
    pub members_deleted: usize,
    pub users_created: usize,
    pub users_updated: usize,
    pub failures: usize,
    pub logs: Vec<String>,
}

#[derive(Debug, Default)]
struct RunLog {
    lines: Vec<String>,
    failures: usize,
}

impl RunLog {
    fn note(&mut self, line: String) {
        info!("{line}");
        self.lines.push(line);
    }

    fn fail(&mut self, line: String) {
        warn!("{line}");
        self.failures += 1;
        self.lines.push(line);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SettingsView {
    pub groups: Vec<StoredGroup>,
    pub preachers: Vec<StoredMember>,
    pub rules: Vec<ServiceRule>,
    pub seeded_rules: usize,
}

pub struct SyncPipeline {
    repo: Repository,
    directory: Arc<dyn DirectoryApi>,
    rules: Arc<RosterRules>,
}

impl SyncPipeline {
    pub fn new(repo: Repository, directory: Arc<dyn DirectoryApi>, rules: Arc<RosterRules>) -> Self {
        Self {
            repo,
            directory,
            rules,
        }
    }

    pub fn rules(&self) -> &RosterRules {
        &self.rules
    }

    /// Reconciles every stored group that links to a directory group.
    ///
    /// Listing groups is the only step whose failure aborts the run.
    pub async fn run_member_sync(&self) -> Result<SyncRunSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let span = info_span!("member_sync", %run_id);

        async {
            let mut log = RunLog::default();
            let mut summary = SyncRunSummary {
                run_id,
                started_at,
                finished_at: started_at,
                groups: Vec::new(),
                members_created: 0,
                members_updated: 0,
                members_deleted: 0,
                users_created: 0,
                users_updated: 0,
                failures: 0,
                logs: Vec::new(),
            };

            let groups = self
                .ensure_groups(&mut log)
                .await
                .context("loading stored groups")?;

            for group in &groups {
                let Some(ct_id) = group.ct_id.as_deref() else {
                    continue;
                };
                self.sync_group(group, ct_id, &mut summary, &mut log).await;
            }

            summary.finished_at = Utc::now();
            summary.failures = log.failures;
            summary.logs = log.lines;
            info!(
                created = summary.members_created,
                updated = summary.members_updated,
                deleted = summary.members_deleted,
                failures = summary.failures,
                "member sync finished"
            );
            Ok(summary)
        }
        .instrument(span)
        .await
    }

    async fn ensure_groups(&self, log: &mut RunLog) -> Result<Vec<StoredGroup>, StoreError> {
        let mut groups = self.repo.groups().await?;
        for seed in &self.rules.ensure_groups {
            if groups.iter().any(|g| g.ct_id.as_deref() == Some(seed.ct_id.as_str())) {
                continue;
            }
            match self.repo.create_group(&seed.name, &seed.ct_id).await {
                Ok(group) => {
                    log.note(format!("created group {} ({})", group.name, seed.ct_id));
                    groups.push(group);
                }
                Err(err) => log.fail(format!("creating group {} failed: {err}", seed.name)),
            }
        }
        Ok(groups)
    }

    async fn sync_group(
        &self,
        group: &StoredGroup,
        ct_id: &str,
        summary: &mut SyncRunSummary,
        log: &mut RunLog,
    ) {
        let mut members = match self.directory.group_members(ct_id).await {
            Ok(members) => members,
            Err(err) => {
                log.fail(format!("group {}: fetching directory members failed: {err}", group.name));
                return;
            }
        };
        self.backfill_emails(&mut members, log).await;

        let stored = match self.repo.members_in_group(&group.id).await {
            Ok(stored) => stored,
            Err(err) => {
                log.fail(format!("group {}: loading stored members failed: {err}", group.name));
                return;
            }
        };

        let plan = reconcile(&members, &stored, group, &self.rules);
        for line in &plan.diagnostics {
            log.note(format!("group {}: {line}", group.name));
        }
        summary.groups.push(GroupSyncSummary {
            group: group.name.clone(),
            directory_members: members.len(),
            operations: plan.operations.len(),
        });

        let mut present: BTreeSet<&str> = stored.iter().map(|m| m.name.as_str()).collect();
        for op in &plan.operations {
            match op {
                MemberOperation::Create(member) => match self.repo.create_member(member).await {
                    Ok(_) => {
                        summary.members_created += 1;
                        present.insert(member.name.as_str());
                        log.note(format!("created member {}", member.name));
                    }
                    Err(err) => log.fail(format!("creating member {} failed: {err}", member.name)),
                },
                MemberOperation::Update { id, name, patch } => {
                    match self.repo.update_member(id, patch).await {
                        Ok(_) => {
                            summary.members_updated += 1;
                            log.note(format!("updated member {name}"));
                        }
                        Err(err) => log.fail(format!("updating member {name} failed: {err}")),
                    }
                }
                MemberOperation::Delete { id, name, variants } => {
                    if !variants.iter().any(|v| present.contains(v.as_str())) {
                        log.note(format!("keeping {name}: no disambiguated variant stored"));
                        continue;
                    }
                    match self.repo.delete_member(id).await {
                        Ok(()) => {
                            summary.members_deleted += 1;
                            log.note(format!("deleted stale member {name}"));
                        }
                        Err(err) => log.fail(format!("deleting member {name} failed: {err}")),
                    }
                }
            }
        }

        self.sync_users(&members, group, summary, log).await;
    }

    async fn backfill_emails(&self, members: &mut [DirectoryMember], log: &mut RunLog) {
        for member in members.iter_mut().filter(|m| m.email.is_none()) {
            match self.directory.person_email(&member.person_id).await {
                Ok(email) => member.email = email,
                Err(err) => log.fail(format!(
                    "fetching email for person {} failed: {err}",
                    member.person_id
                )),
            }
        }
    }

    async fn sync_users(
        &self,
        members: &[DirectoryMember],
        group: &StoredGroup,
        summary: &mut SyncRunSummary,
        log: &mut RunLog,
    ) {
        let mut existing: Vec<UserAccount> = Vec::new();
        for email in members.iter().filter_map(|m| m.email.as_deref()) {
            match self.repo.find_user_by_email(email.trim()).await {
                Ok(user) => existing.push(user),
                Err(err) if err.is_not_found() => {}
                Err(err) => log.fail(format!("looking up user {email} failed: {err}")),
            }
        }

        let plan = plan_user_accounts(members, &existing, group, &self.rules);
        for line in &plan.diagnostics {
            log.note(line.clone());
        }
        for op in &plan.operations {
            match op {
                UserOperation::Create(user) => match self.repo.create_user(user).await {
                    Ok(_) => {
                        summary.users_created += 1;
                        log.note(format!("created user {}", user.email));
                    }
                    Err(err) => log.fail(format!("creating user {} failed: {err}", user.email)),
                },
                UserOperation::Update { id, email, patch } => {
                    match self.repo.update_user(id, patch).await {
                        Ok(_) => {
                            summary.users_updated += 1;
                            log.note(format!("updated user {email}"));
                        }
                        Err(err) => log.fail(format!("updating user {email} failed: {err}")),
                    }
                }
            }
        }
    }
}

/// Seeds the configured default rules into an empty `service_rules` collection.
pub async fn seed_service_rules(repo: &Repository, rules: &RosterRules) -> Result<usize, StoreError> {
    if !repo.service_rules().await?.is_empty() {
        return Ok(0);
    }
    let mut seen: BTreeSet<(RuleWeekday, String, u8)> = BTreeSet::new();
    let mut seeded = 0;
    for rule in &rules.default_rules {
        let key = (rule.weekday, normalize_clock(&rule.time), rule.nth_sunday);
        if !seen.insert(key) {
            warn!(weekday = %rule.weekday, time = %rule.time, "duplicate default rule skipped");
            continue;
        }
        repo.create_service_rule(rule).await?;
        seeded += 1;
    }
    info!(seeded, "service rules seeded");
    Ok(seeded)
}

/// Settings view: groups, preacher-group members and rules, seeding defaults first.
pub async fn load_settings(
    repo: &Repository,
    rules: &RosterRules,
    preacher_group_ct_id: &str,
) -> Result<SettingsView, StoreError> {
    let seeded_rules = seed_service_rules(repo, rules).await?;
    let groups = repo.groups().await?;
    let preachers = match groups
        .iter()
        .find(|g| g.ct_id.as_deref() == Some(preacher_group_ct_id))
    {
        Some(group) => repo.members_in_group(&group.id).await?,
        None => Vec::new(),
    };
    Ok(SettingsView {
        groups,
        preachers,
        rules: repo.service_rules().await?,
        seeded_rules,
    })
}

pub async fn run_member_sync_from_env() -> Result<SyncRunSummary> {
    let config = SyncConfig::from_env();
    let rules = config.load_rules()?;
    let repo = config.connect_store().await?;
    let directory = config.connect_directory()?;
    SyncPipeline::new(repo, Arc::new(directory), Arc::new(rules))
        .run_member_sync()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use roster_directory::{DirectoryCall, FixtureDirectory};
    use roster_storage::records::{GROUPS, MEMBERS, SERVICE_RULES, USERS};
    use roster_storage::{Filter, MemoryStore};
    use serde_json::json;

    fn workspace_path(relative: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../..").join(relative)
    }

    fn deployment_rules() -> RosterRules {
        RosterRules::from_path(workspace_path("rules/roster.yaml")).expect("rules")
    }

    fn fixture() -> Arc<FixtureDirectory> {
        Arc::new(
            FixtureDirectory::from_path(workspace_path("fixtures/directory/preacher_group.json"))
                .expect("fixture"),
        )
    }

    #[test]
    fn config_reads_lookup_with_defaults() {
        let vars: BTreeMap<&str, &str> = [
            ("PB_ADMIN_PASSWORD", "'s3cret'"),
            ("ROSTER_HTTP_TIMEOUT_SECS", "5"),
            ("PREACHER_GROUP_ID", " "),
        ]
        .into_iter()
        .collect();
        let config = SyncConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.pb_admin_password.as_deref(), Some("s3cret"));
        assert_eq!(config.http_timeout_secs, 5);
        assert_eq!(config.preacher_group_id, "164");
        assert_eq!(config.pocketbase_url, "http://127.0.0.1:8090");
        assert_eq!(config.web_port, 8000);
        assert!(config.connect_directory().is_err());
    }

    #[test]
    fn deployment_rules_parse_and_defaults_stay_minimal() {
        let rules = deployment_rules();
        assert_eq!(rules.name_overrides.get("19").map(String::as_str), Some("(Jun.)"));
        assert_eq!(rules.default_rules.len(), 12);
        assert!(rules.calendars.excludes(90, 6));
        assert_eq!(rules.ensure_groups[0].ct_id, "164");

        let defaults = RosterRules::default();
        assert!(defaults.default_rules.is_empty());
        assert_eq!(defaults.roles.label_for(42), "Teilnehmer 2");
        assert_eq!(defaults.roles.label_for(1), "Teilnehmer");

        let partial = RosterRules::from_yaml("name_overrides:\n  \"7\": \"(A)\"\n").expect("partial");
        assert_eq!(partial.services, ServiceCatalog::default());
    }

    #[tokio::test]
    async fn member_sync_creates_group_members_and_users() {
        let store = Arc::new(MemoryStore::new());
        store
            .seed(
                MEMBERS,
                [json!({"id": "stale", "name": "Viktor Enns", "group": "rec000001", "role": "Leiter", "ct_id": "19"})],
            )
            .await;
        let repo = Repository::new(store.clone());
        let directory = fixture();
        let pipeline = SyncPipeline::new(repo, directory.clone(), Arc::new(deployment_rules()));

        let summary = pipeline.run_member_sync().await.expect("sync");

        let groups = store.records(GROUPS).await;
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0]["id"], json!("rec000001"));

        let names = store
            .records(MEMBERS)
            .await
            .iter()
            .map(|m| m["name"].as_str().unwrap_or_default().to_string())
            .collect::<BTreeSet<_>>();
        assert_eq!(
            names,
            ["Anna Penner", "Paul Wiens", "Viktor Enns (Jun.)", "Viktor Enns (Sen.)"]
                .into_iter()
                .map(str::to_string)
                .collect()
        );
        assert_eq!(summary.members_created, 4);
        assert_eq!(summary.members_deleted, 1);
        assert_eq!(summary.users_created, 4);
        assert_eq!(summary.failures, 0);
        assert!(summary.logs.iter().any(|l| l.contains("person 900")));
        assert!(directory
            .calls()
            .await
            .contains(&DirectoryCall::PersonEmail("613".into())));

        let admin = store
            .records(USERS)
            .await
            .into_iter()
            .find(|u| u["email"] == json!("viktor.jun@example.org"))
            .expect("leader account");
        assert_eq!(admin["role"], json!("admin"));
    }

    #[tokio::test]
    async fn member_sync_survives_per_item_failures() {
        let store = Arc::new(MemoryStore::new());
        store
            .seed(GROUPS, [json!({"id": "g1", "name": "Prediger", "ct_id": "164"}), json!({"id": "g2", "name": "Jugend", "ct_id": "31"})])
            .await;
        store
            .reject_writes(MEMBERS, Filter::eq("name", "Paul Wiens"))
            .await;
        let directory = fixture();
        directory
            .fail_call(DirectoryCall::GroupMembers("31".into()))
            .await;
        let pipeline = SyncPipeline::new(Repository::new(store.clone()), directory, Arc::new(deployment_rules()));

        let summary = pipeline.run_member_sync().await.expect("sync");
        assert_eq!(summary.failures, 2);
        assert_eq!(summary.members_created, 3);
        assert_eq!(summary.groups.len(), 1);
    }

    #[tokio::test]
    async fn bare_record_is_kept_when_no_variant_could_be_created() {
        let store = Arc::new(MemoryStore::new());
        store
            .seed(GROUPS, [json!({"id": "g1", "name": "Prediger", "ct_id": "164"})])
            .await;
        store
            .seed(
                MEMBERS,
                [json!({"id": "m1", "name": "Viktor Enns", "group": "g1", "role": "Leiter", "ct_id": "19", "allowed_services": ["L", "1"]})],
            )
            .await;
        for name in ["Viktor Enns (Jun.)", "Viktor Enns (Sen.)"] {
            store.reject_writes(MEMBERS, Filter::eq("name", name)).await;
        }
        let pipeline = SyncPipeline::new(Repository::new(store.clone()), fixture(), Arc::new(deployment_rules()));

        let summary = pipeline.run_member_sync().await.expect("sync");
        assert_eq!(summary.members_deleted, 0);
        assert_eq!(summary.failures, 2);
        assert!(summary
            .logs
            .iter()
            .any(|l| l.contains("keeping Viktor Enns: no disambiguated variant stored")));

        let bare = store
            .records(MEMBERS)
            .await
            .into_iter()
            .find(|m| m["id"] == json!("m1"))
            .expect("bare record survives");
        assert_eq!(bare["allowed_services"], json!(["L", "1"]));
    }

    #[tokio::test]
    async fn settings_seed_default_rules_once() {
        let store = Arc::new(MemoryStore::new());
        store
            .seed(GROUPS, [json!({"id": "g1", "name": "Prediger", "ct_id": "164"})])
            .await;
        store
            .seed(MEMBERS, [json!({"id": "m1", "name": "Anna Penner", "group": "g1", "role": "Teilnehmer", "ct_id": "77"})])
            .await;
        let repo = Repository::new(store.clone());
        let mut rules = deployment_rules();
        rules.default_rules.push(rules.default_rules[0].clone());

        let settings = load_settings(&repo, &rules, "164").await.expect("settings");
        assert_eq!(settings.seeded_rules, 12);
        assert_eq!(settings.rules.len(), 12);
        assert_eq!(settings.preachers.len(), 1);
        assert_eq!(settings.rules[0].weekday, RuleWeekday::SUNDAY);

        let again = load_settings(&repo, &rules, "164").await.expect("settings");
        assert_eq!(again.seeded_rules, 0);
        assert_eq!(store.records(SERVICE_RULES).await.len(), 12);
    }
}
