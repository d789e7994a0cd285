//! Name reconciliation between directory members and stored member records.

use std::collections::{BTreeMap, BTreeSet};

use roster_core::{
    AppRole, DirectoryMember, MemberPatch, NewMember, NewUserAccount, StoredGroup, StoredMember,
    UserAccount, UserPatch,
};
use serde::Serialize;
use strsim::jaro_winkler;
use uuid::Uuid;

use crate::RosterRules;

/// Similarity above which an unmatched stored name is reported as a possible rename.
pub const NEAR_MISS_THRESHOLD: f64 = 0.92;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MemberOperation {
    Create(NewMember),
    Update {
        id: String,
        name: String,
        patch: MemberPatch,
    },
    /// Stale bare-name record superseded by disambiguated variants.
    Delete {
        id: String,
        name: String,
        /// Grid names that replace the bare record.
        variants: Vec<String>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationPlan {
    pub operations: Vec<MemberOperation>,
    pub diagnostics: Vec<String>,
}

/// A directory member paired with the grid name it is stored under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GridName<'a> {
    pub member: &'a DirectoryMember,
    pub name: String,
    /// Bare display name when `name` carries a disambiguation suffix.
    pub collided_with: Option<String>,
}

/// Grid names for a directory group. Members without any name part are left out.
pub fn grid_names<'a>(
    members: &'a [DirectoryMember],
    overrides: &BTreeMap<String, String>,
) -> Vec<GridName<'a>> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for member in members {
        let name = member.display_name();
        if !name.is_empty() {
            *counts.entry(name).or_default() += 1;
        }
    }

    members
        .iter()
        .filter_map(|member| {
            let bare = member.display_name();
            if bare.is_empty() {
                return None;
            }
            if counts.get(&bare).copied().unwrap_or_default() < 2 {
                return Some(GridName {
                    member,
                    name: bare,
                    collided_with: None,
                });
            }
            let suffix = overrides
                .get(&member.person_id)
                .cloned()
                .unwrap_or_else(|| format!("({})", member.person_id));
            Some(GridName {
                member,
                name: format!("{bare} {suffix}"),
                collided_with: Some(bare),
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateName {
    pub group: String,
    pub name: String,
    pub ids: Vec<String>,
}

/// Names held by more than one stored record of the same group.
pub fn find_duplicate_names(stored: &[StoredMember]) -> Vec<DuplicateName> {
    let mut by_key: BTreeMap<(&str, &str), Vec<String>> = BTreeMap::new();
    for member in stored {
        by_key
            .entry((member.group.as_str(), member.name.as_str()))
            .or_default()
            .push(member.id.clone());
    }
    by_key
        .into_iter()
        .filter(|(_, ids)| ids.len() > 1)
        .map(|((group, name), ids)| DuplicateName {
            group: group.to_string(),
            name: name.to_string(),
            ids,
        })
        .collect()
}

/// Diff one directory group against the stored members of its local group.
///
/// Operations follow directory order; bare-name cleanup deletes come last.
pub fn reconcile(
    directory: &[DirectoryMember],
    stored: &[StoredMember],
    group: &StoredGroup,
    rules: &RosterRules,
) -> ReconciliationPlan {
    let mut plan = ReconciliationPlan::default();
    let in_group = stored.iter().filter(|m| m.group == group.id).collect::<Vec<_>>();

    for duplicate in find_duplicate_names(stored).iter().filter(|d| d.group == group.id) {
        plan.diagnostics.push(format!(
            "stored duplicate {:?} in group {} ({} records); using {}",
            duplicate.name,
            group.name,
            duplicate.ids.len(),
            duplicate.ids[0]
        ));
    }

    let mut by_name: BTreeMap<&str, &StoredMember> = BTreeMap::new();
    for member in &in_group {
        by_name.entry(member.name.as_str()).or_insert(member);
    }

    for member in directory.iter().filter(|m| m.display_name().is_empty()) {
        plan.diagnostics.push(format!(
            "skipping person {}: no first or last name",
            member.person_id
        ));
    }

    let names = grid_names(directory, &rules.name_overrides);
    let mut matched: BTreeSet<&str> = BTreeSet::new();
    let mut creates = Vec::new();
    let mut collided: BTreeSet<&str> = BTreeSet::new();

    for grid in &names {
        if let Some(bare) = &grid.collided_with {
            collided.insert(bare.as_str());
            if !rules.name_overrides.contains_key(&grid.member.person_id) {
                plan.diagnostics.push(format!(
                    "ambiguous name {bare:?}: no override for person {}, using {:?}",
                    grid.member.person_id, grid.name
                ));
            }
        }

        let role = rules.roles.label_for(grid.member.group_type_role_id);
        if !rules.roles.is_mapped(grid.member.group_type_role_id) {
            plan.diagnostics.push(format!(
                "unexpected role id {} for {}; using {role:?}",
                grid.member.group_type_role_id, grid.name
            ));
        }

        match by_name.get(grid.name.as_str()) {
            Some(existing) => {
                matched.insert(existing.id.as_str());
                let mut patch = MemberPatch::default();
                if existing.role != role {
                    patch.role = Some(role.to_string());
                }
                match existing.ct_id.as_deref() {
                    None => patch.ct_id = Some(grid.member.person_id.clone()),
                    Some(ct_id) if ct_id != grid.member.person_id => {
                        plan.diagnostics.push(format!(
                            "{} is linked to person {ct_id} but matched person {}; link kept",
                            grid.name, grid.member.person_id
                        ));
                    }
                    Some(_) => {}
                }
                if !patch.is_empty() {
                    plan.operations.push(MemberOperation::Update {
                        id: existing.id.clone(),
                        name: grid.name.clone(),
                        patch,
                    });
                }
            }
            None => {
                creates.push(grid.name.as_str());
                plan.operations.push(MemberOperation::Create(NewMember {
                    name: grid.name.clone(),
                    group: group.id.clone(),
                    role: role.to_string(),
                    ct_id: grid.member.person_id.clone(),
                    allowed_services: Vec::new(),
                }));
            }
        }
    }

    let stale = in_group
        .iter()
        .filter(|m| collided.contains(m.name.as_str()) && !matched.contains(m.id.as_str()))
        .collect::<Vec<_>>();
    let stale_ids = stale.iter().map(|m| m.id.as_str()).collect::<BTreeSet<_>>();

    for name in creates {
        let near = in_group
            .iter()
            .filter(|m| !matched.contains(m.id.as_str()) && !stale_ids.contains(m.id.as_str()))
            .map(|m| (m, jaro_winkler(name, &m.name)))
            .filter(|(_, score)| *score >= NEAR_MISS_THRESHOLD)
            .max_by(|a, b| a.1.total_cmp(&b.1));
        if let Some((candidate, score)) = near {
            plan.diagnostics.push(format!(
                "possible rename: new member {name:?} resembles stored {:?} ({score:.3})",
                candidate.name
            ));
        }
    }

    let mut deleted: BTreeSet<&str> = BTreeSet::new();
    for member in stale {
        if !deleted.insert(member.name.as_str()) {
            plan.diagnostics.push(format!(
                "stored duplicate {:?} ({}) left in place; remove it by hand",
                member.name, member.id
            ));
            continue;
        }
        let variants = names
            .iter()
            .filter(|g| g.collided_with.as_deref() == Some(member.name.as_str()))
            .map(|g| g.name.clone())
            .collect();
        plan.operations.push(MemberOperation::Delete {
            id: member.id.clone(),
            name: member.name.clone(),
            variants,
        });
    }

    plan
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum UserOperation {
    Create(NewUserAccount),
    Update {
        id: String,
        email: String,
        patch: UserPatch,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserAccountPlan {
    pub operations: Vec<UserOperation>,
    pub diagnostics: Vec<String>,
}

fn temporary_password() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Login accounts for directory members that carry an email.
pub fn plan_user_accounts(
    members: &[DirectoryMember],
    existing: &[UserAccount],
    group: &StoredGroup,
    rules: &RosterRules,
) -> UserAccountPlan {
    let mut plan = UserAccountPlan::default();
    let mut seen = BTreeSet::new();

    for member in members {
        let name = member.display_name();
        let Some(email) = member
            .email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
        else {
            plan.diagnostics.push(format!(
                "no email for {} (person {}); no login account",
                if name.is_empty() { "<unnamed>" } else { name.as_str() },
                member.person_id
            ));
            continue;
        };
        if !seen.insert(email.to_ascii_lowercase()) {
            plan.diagnostics
                .push(format!("email {email} is shared by several members; first one wins"));
            continue;
        }

        let role = if rules.leader_role_ids.contains(&member.group_type_role_id) {
            AppRole::Admin
        } else {
            AppRole::User
        };

        match existing.iter().find(|u| u.email.eq_ignore_ascii_case(email)) {
            Some(user) => {
                let mut patch = UserPatch::default();
                if user.name != name {
                    patch.name = Some(name.clone());
                }
                if user.role != role {
                    patch.role = Some(role);
                }
                if !user.groups.contains(&group.id) {
                    let mut groups = user.groups.clone();
                    groups.push(group.id.clone());
                    patch.groups = Some(groups);
                }
                if !patch.is_empty() {
                    plan.operations.push(UserOperation::Update {
                        id: user.id.clone(),
                        email: user.email.clone(),
                        patch,
                    });
                }
            }
            None => {
                let password = temporary_password();
                plan.operations.push(UserOperation::Create(NewUserAccount {
                    email: email.to_string(),
                    email_visibility: true,
                    password: password.clone(),
                    password_confirm: password,
                    name,
                    role,
                    groups: vec![group.id.clone()],
                }));
            }
        }
    }
    plan
}
