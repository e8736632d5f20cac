//! Approver resolution: turning a step's routing rule into a concrete list
//! of users, against a pluggable organization directory.
//!
//! Resolution is fail-open on missing data (an unknown user or department
//! simply contributes nobody) and fail-closed on bad predicates (a regex
//! that does not compile matches no one). Errors are reserved for the
//! storage layer behind the directory, not for "nobody matched".

use std::collections::HashSet;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::workflow::UserRef;

mod directory;

pub use directory::{Department, DirectoryUser, InMemoryOrgDirectory, OrgDirectory};

/// Inputs the resolver may draw on besides the directory itself: the form
/// as submitted and the subject the workflow is about.
#[derive(Clone, Debug, Default)]
pub struct ResolutionContext {
    /// User the workflow concerns (applicant, hazard reporter). Supervisor
    /// resolution starts here unless the rule names someone else.
    pub subject_user: Option<String>,
    /// Department that owns the business record.
    pub owning_department: Option<String>,
    /// Flattened form field values, keyed by field name.
    pub fields: std::collections::BTreeMap<String, String>,
}

impl ResolutionContext {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Which department a `DepartmentManager` rule targets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum DepartmentSelector {
    /// The department owning the business record.
    Owning,
    /// A fixed department id.
    Named { department_id: String },
    /// A department named in a form field, looked up by display name.
    FromField { field: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Conjunction {
    And,
    Or,
}

/// User attribute a predicate inspects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeField {
    Name,
    JobTitle,
    DepartmentId,
    Level,
}

/// Closed set of comparison operators. String operators against the `Level`
/// field compare its decimal rendering; the `at_least`/`at_most` operators
/// are the intended way to express hierarchy thresholds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PredicateOp {
    Equals { value: String },
    Contains { value: String },
    StartsWith { value: String },
    In { values: Vec<String> },
    Regex { pattern: String },
    AtLeast { level: i32 },
    AtMost { level: i32 },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub field: AttributeField,
    #[serde(flatten)]
    pub op: PredicateOp,
}

impl Predicate {
    pub fn evaluate(&self, user: &DirectoryUser) -> bool {
        let text = match self.field {
            AttributeField::Name => Some(user.name.clone()),
            AttributeField::JobTitle => user.job_title.clone(),
            AttributeField::DepartmentId => user.department_id.clone(),
            AttributeField::Level => user.level.map(|l| l.to_string()),
        };
        match &self.op {
            PredicateOp::Equals { value } => text.as_deref() == Some(value.as_str()),
            PredicateOp::Contains { value } => {
                text.as_deref().is_some_and(|t| t.contains(value.as_str()))
            }
            PredicateOp::StartsWith { value } => {
                text.as_deref().is_some_and(|t| t.starts_with(value.as_str()))
            }
            PredicateOp::In { values } => {
                text.as_deref().is_some_and(|t| values.iter().any(|v| v == t))
            }
            PredicateOp::Regex { pattern } => match Regex::new(pattern) {
                Ok(re) => text.as_deref().is_some_and(|t| re.is_match(t)),
                Err(error) => {
                    warn!(
                        event_name = "predicate_regex_invalid",
                        pattern, %error,
                        "regex predicate failed to compile, matching nobody"
                    );
                    false
                }
            },
            PredicateOp::AtLeast { level } => user.level.is_some_and(|l| l >= *level),
            PredicateOp::AtMost { level } => user.level.is_some_and(|l| l <= *level),
        }
    }
}

/// Routing rule attached to a workflow step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ResolutionSpec {
    /// Fixed list of user ids; unknown ids are skipped.
    SpecificUsers { user_ids: Vec<String> },
    /// Manager of the selected department.
    DepartmentManager { department: DepartmentSelector },
    /// Supervisor of the subject (or of a named user), walking up the
    /// department hierarchy when no direct manager is set.
    Supervisor {
        #[serde(default)]
        user_id: Option<String>,
    },
    /// Everyone in the directory whose attributes satisfy the predicates.
    AttributeMatch { conjunction: Conjunction, predicates: Vec<Predicate> },
}

pub struct ApproverResolver<'a, D: OrgDirectory + ?Sized> {
    directory: &'a D,
    max_supervisor_depth: usize,
}

impl<'a, D: OrgDirectory + ?Sized> ApproverResolver<'a, D> {
    pub fn new(directory: &'a D, max_supervisor_depth: usize) -> Self {
        Self { directory, max_supervisor_depth }
    }

    /// Resolve a rule to a de-duplicated, order-preserving candidate list.
    pub fn resolve(&self, spec: &ResolutionSpec, ctx: &ResolutionContext) -> Vec<UserRef> {
        let raw = match spec {
            ResolutionSpec::SpecificUsers { user_ids } => user_ids
                .iter()
                .filter_map(|id| self.directory.user_by_id(id))
                .map(user_ref)
                .collect(),
            ResolutionSpec::DepartmentManager { department } => self
                .select_department(department, ctx)
                .and_then(|dept| dept.manager_id)
                .and_then(|id| self.directory.user_by_id(&id))
                .map(user_ref)
                .into_iter()
                .collect(),
            ResolutionSpec::Supervisor { user_id } => {
                let subject = user_id.as_deref().or(ctx.subject_user.as_deref());
                match subject {
                    Some(subject) => {
                        self.find_supervisor(subject).map(user_ref).into_iter().collect()
                    }
                    None => {
                        warn!(
                            event_name = "supervisor_subject_missing",
                            "supervisor rule has no subject user, resolving nobody"
                        );
                        Vec::new()
                    }
                }
            }
            ResolutionSpec::AttributeMatch { conjunction, predicates } => self
                .directory
                .users()
                .into_iter()
                .filter(|user| match conjunction {
                    Conjunction::And => predicates.iter().all(|p| p.evaluate(user)),
                    Conjunction::Or => predicates.iter().any(|p| p.evaluate(user)),
                })
                .map(user_ref)
                .collect::<Vec<_>>(),
        };
        dedup_by_id(raw)
    }

    fn select_department(
        &self,
        selector: &DepartmentSelector,
        ctx: &ResolutionContext,
    ) -> Option<Department> {
        match selector {
            DepartmentSelector::Owning => {
                let id = ctx.owning_department.as_deref()?;
                self.directory.department(id)
            }
            DepartmentSelector::Named { department_id } => self.directory.department(department_id),
            DepartmentSelector::FromField { field } => {
                let name = ctx.field(field)?;
                self.directory.department_by_name(name.trim())
            }
        }
    }

    /// Supervisor of `user_id`: the direct manager when one is set, otherwise
    /// the first department manager up the hierarchy who is not the user
    /// themself. The walk is bounded by depth and a visited set so cyclic
    /// directory data cannot loop.
    pub fn find_supervisor(&self, user_id: &str) -> Option<DirectoryUser> {
        let user = self.directory.user_by_id(user_id)?;
        if let Some(manager_id) = &user.direct_manager_id {
            if manager_id != user_id {
                if let Some(manager) = self.directory.user_by_id(manager_id) {
                    return Some(manager);
                }
            }
        }

        let mut visited: HashSet<String> = HashSet::new();
        let mut cursor = user.department_id.clone();
        for _ in 0..self.max_supervisor_depth {
            let dept_id = cursor?;
            if !visited.insert(dept_id.clone()) {
                warn!(
                    event_name = "supervisor_walk_cycle",
                    department_id = %dept_id,
                    "department hierarchy contains a cycle, stopping the walk"
                );
                return None;
            }
            let dept = self.directory.department(&dept_id)?;
            if let Some(manager_id) = &dept.manager_id {
                if manager_id != user_id {
                    if let Some(manager) = self.directory.user_by_id(manager_id) {
                        return Some(manager);
                    }
                }
            }
            cursor = dept.parent_id;
        }
        warn!(
            event_name = "supervisor_walk_exhausted",
            user_id,
            max_depth = self.max_supervisor_depth,
            "supervisor walk hit the depth bound without finding a manager"
        );
        None
    }
}

fn user_ref(user: DirectoryUser) -> UserRef {
    UserRef { id: user.id, name: user.name }
}

fn dedup_by_id(users: Vec<UserRef>) -> Vec<UserRef> {
    let mut seen = HashSet::new();
    users.into_iter().filter(|u| seen.insert(u.id.clone())).collect()
}

#[cfg(test)]
mod tests {
    use crate::resolve::directory::{Department, DirectoryUser, InMemoryOrgDirectory};

    use super::{
        ApproverResolver, AttributeField, Conjunction, DepartmentSelector, Predicate, PredicateOp,
        ResolutionContext, ResolutionSpec,
    };

    fn user(id: &str, name: &str, dept: Option<&str>) -> DirectoryUser {
        DirectoryUser {
            id: id.to_string(),
            name: name.to_string(),
            job_title: None,
            department_id: dept.map(str::to_string),
            direct_manager_id: None,
            level: None,
        }
    }

    fn dept(id: &str, name: &str, manager: Option<&str>, parent: Option<&str>) -> Department {
        Department {
            id: id.to_string(),
            name: name.to_string(),
            manager_id: manager.map(str::to_string),
            parent_id: parent.map(str::to_string),
        }
    }

    fn plant_directory() -> InMemoryOrgDirectory {
        InMemoryOrgDirectory::new(
            vec![
                user("u-worker", "Shift Worker", Some("d-line")),
                user("u-lead", "Line Lead", Some("d-line")),
                user("u-plant", "Plant Manager", Some("d-plant")),
                DirectoryUser {
                    id: "u-safety".to_string(),
                    name: "Safety Officer".to_string(),
                    job_title: Some("EHS Safety Officer".to_string()),
                    department_id: Some("d-plant".to_string()),
                    direct_manager_id: None,
                    level: Some(3),
                },
                DirectoryUser {
                    id: "u-chief".to_string(),
                    name: "Chief Engineer".to_string(),
                    job_title: Some("Chief Engineer".to_string()),
                    department_id: Some("d-plant".to_string()),
                    direct_manager_id: None,
                    level: Some(5),
                },
            ],
            vec![
                dept("d-line", "Line 4", Some("u-lead"), Some("d-plant")),
                dept("d-plant", "North Plant", Some("u-plant"), None),
            ],
        )
    }

    fn ctx() -> ResolutionContext {
        ResolutionContext {
            subject_user: Some("u-worker".to_string()),
            owning_department: Some("d-line".to_string()),
            fields: Default::default(),
        }
    }

    #[test]
    fn specific_users_skips_unknown_ids_and_dedups() {
        let dir = plant_directory();
        let resolver = ApproverResolver::new(&dir, 16);
        let spec = ResolutionSpec::SpecificUsers {
            user_ids: vec![
                "u-lead".to_string(),
                "u-ghost".to_string(),
                "u-lead".to_string(),
                "u-plant".to_string(),
            ],
        };
        let out = resolver.resolve(&spec, &ctx());
        let ids: Vec<_> = out.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["u-lead", "u-plant"]);
    }

    #[test]
    fn department_manager_from_owning_department() {
        let dir = plant_directory();
        let resolver = ApproverResolver::new(&dir, 16);
        let spec =
            ResolutionSpec::DepartmentManager { department: DepartmentSelector::Owning };
        let out = resolver.resolve(&spec, &ctx());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "u-lead");
    }

    #[test]
    fn department_manager_from_form_field() {
        let dir = plant_directory();
        let resolver = ApproverResolver::new(&dir, 16);
        let mut context = ctx();
        context.fields.insert("target_department".to_string(), " North Plant ".to_string());
        let spec = ResolutionSpec::DepartmentManager {
            department: DepartmentSelector::FromField { field: "target_department".to_string() },
        };
        let out = resolver.resolve(&spec, &context);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "u-plant");
    }

    #[test]
    fn supervisor_prefers_direct_manager() {
        let mut dir = plant_directory();
        dir.upsert_user(DirectoryUser {
            direct_manager_id: Some("u-safety".to_string()),
            ..user("u-worker", "Shift Worker", Some("d-line"))
        });
        let resolver = ApproverResolver::new(&dir, 16);
        let found = resolver.find_supervisor("u-worker").expect("supervisor");
        assert_eq!(found.id, "u-safety");
    }

    #[test]
    fn supervisor_falls_back_to_department_manager() {
        let dir = plant_directory();
        let resolver = ApproverResolver::new(&dir, 16);
        let found = resolver.find_supervisor("u-worker").expect("supervisor");
        assert_eq!(found.id, "u-lead");
    }

    #[test]
    fn supervisor_of_a_manager_climbs_to_the_parent_department() {
        // The line lead manages their own department, so resolution must not
        // return the lead as their own supervisor.
        let dir = plant_directory();
        let resolver = ApproverResolver::new(&dir, 16);
        let found = resolver.find_supervisor("u-lead").expect("supervisor");
        assert_eq!(found.id, "u-plant");
    }

    #[test]
    fn supervisor_walk_survives_department_cycles() {
        let dir = InMemoryOrgDirectory::new(
            vec![user("u-1", "Orphan", Some("d-a"))],
            vec![dept("d-a", "A", None, Some("d-b")), dept("d-b", "B", None, Some("d-a"))],
        );
        let resolver = ApproverResolver::new(&dir, 16);
        assert!(resolver.find_supervisor("u-1").is_none());
    }

    #[test]
    fn supervisor_walk_respects_the_depth_bound() {
        // Chain of 40 departments with a manager only at the very top.
        let mut departments: Vec<Department> = (0..39)
            .map(|i| {
                let parent = format!("d-{}", i + 1);
                dept(&format!("d-{i}"), &format!("Dept {i}"), None, Some(parent.as_str()))
            })
            .collect();
        departments.push(dept("d-39", "Top", Some("u-boss"), None));
        let dir = InMemoryOrgDirectory::new(
            vec![user("u-1", "Deep Worker", Some("d-0")), user("u-boss", "Boss", None)],
            departments,
        );
        assert!(ApproverResolver::new(&dir, 8).find_supervisor("u-1").is_none());
        let found = ApproverResolver::new(&dir, 64).find_supervisor("u-1").expect("supervisor");
        assert_eq!(found.id, "u-boss");
    }

    #[test]
    fn attribute_match_and_or_semantics() {
        let dir = plant_directory();
        let resolver = ApproverResolver::new(&dir, 16);
        let title_contains = Predicate {
            field: AttributeField::JobTitle,
            op: PredicateOp::Contains { value: "Engineer".to_string() },
        };
        let senior = Predicate {
            field: AttributeField::Level,
            op: PredicateOp::AtLeast { level: 3 },
        };

        let both = ResolutionSpec::AttributeMatch {
            conjunction: Conjunction::And,
            predicates: vec![title_contains.clone(), senior.clone()],
        };
        let out = resolver.resolve(&both, &ctx());
        assert_eq!(out.iter().map(|u| u.id.as_str()).collect::<Vec<_>>(), vec!["u-chief"]);

        let either = ResolutionSpec::AttributeMatch {
            conjunction: Conjunction::Or,
            predicates: vec![title_contains, senior],
        };
        let out = resolver.resolve(&either, &ctx());
        let ids: Vec<_> = out.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["u-safety", "u-chief"]);
    }

    #[test]
    fn attribute_match_operators() {
        let dir = plant_directory();
        let resolver = ApproverResolver::new(&dir, 16);
        let cases = vec![
            (
                PredicateOp::Equals { value: "Safety Officer".to_string() },
                AttributeField::Name,
                vec!["u-safety"],
            ),
            (
                PredicateOp::StartsWith { value: "EHS".to_string() },
                AttributeField::JobTitle,
                vec!["u-safety"],
            ),
            (
                PredicateOp::In { values: vec!["d-line".to_string()] },
                AttributeField::DepartmentId,
                vec!["u-worker", "u-lead"],
            ),
            (
                PredicateOp::Regex { pattern: "^(Chief|EHS)".to_string() },
                AttributeField::JobTitle,
                vec!["u-safety", "u-chief"],
            ),
            (PredicateOp::AtMost { level: 3 }, AttributeField::Level, vec!["u-safety"]),
        ];
        for (op, field, expected) in cases {
            let spec = ResolutionSpec::AttributeMatch {
                conjunction: Conjunction::And,
                predicates: vec![Predicate { field, op }],
            };
            let ids: Vec<_> =
                resolver.resolve(&spec, &ctx()).into_iter().map(|u| u.id).collect();
            assert_eq!(ids, expected);
        }
    }

    #[test]
    fn malformed_regex_matches_nobody() {
        let dir = plant_directory();
        let resolver = ApproverResolver::new(&dir, 16);
        let spec = ResolutionSpec::AttributeMatch {
            conjunction: Conjunction::Or,
            predicates: vec![Predicate {
                field: AttributeField::Name,
                op: PredicateOp::Regex { pattern: "([unclosed".to_string() },
            }],
        };
        assert!(resolver.resolve(&spec, &ctx()).is_empty());
    }

    #[test]
    fn resolution_spec_round_trips_through_json() {
        let spec = ResolutionSpec::AttributeMatch {
            conjunction: Conjunction::And,
            predicates: vec![Predicate {
                field: AttributeField::Level,
                op: PredicateOp::AtLeast { level: 4 },
            }],
        };
        let raw = serde_json::to_string(&spec).expect("serialize");
        assert!(raw.contains("\"strategy\":\"attribute_match\""), "{raw}");
        let back: ResolutionSpec = serde_json::from_str(&raw).expect("deserialize");
        assert_eq!(back, spec);
    }
}
