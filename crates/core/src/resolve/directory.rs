use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A user as the organization directory knows one. Attribute predicates and
/// supervisor walks read from here, never from workflow state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryUser {
    pub id: String,
    pub name: String,
    pub job_title: Option<String>,
    pub department_id: Option<String>,
    /// Explicit supervisor override. Takes precedence over the department
    /// hierarchy when set.
    pub direct_manager_id: Option<String>,
    /// Hierarchy level, higher means more senior.
    pub level: Option<i32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Department {
    pub id: String,
    pub name: String,
    pub manager_id: Option<String>,
    pub parent_id: Option<String>,
}

/// Read-only view of the org chart. Implementations back onto whatever HR
/// store the deployment has; the in-memory one below serves tests and tools.
pub trait OrgDirectory {
    fn user_by_id(&self, user_id: &str) -> Option<DirectoryUser>;
    fn department(&self, department_id: &str) -> Option<Department>;
    fn department_by_name(&self, name: &str) -> Option<Department>;
    /// Full user listing, used by attribute-match resolution. Ordering is
    /// implementation-defined but must be stable within a call.
    fn users(&self) -> Vec<DirectoryUser>;
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryOrgDirectory {
    users: Vec<DirectoryUser>,
    by_id: HashMap<String, usize>,
    departments: HashMap<String, Department>,
}

impl InMemoryOrgDirectory {
    pub fn new(users: Vec<DirectoryUser>, departments: Vec<Department>) -> Self {
        let mut dir = Self::default();
        for user in users {
            dir.upsert_user(user);
        }
        for dept in departments {
            dir.upsert_department(dept);
        }
        dir
    }

    pub fn upsert_user(&mut self, user: DirectoryUser) {
        match self.by_id.get(&user.id) {
            Some(&index) => self.users[index] = user,
            None => {
                self.by_id.insert(user.id.clone(), self.users.len());
                self.users.push(user);
            }
        }
    }

    pub fn upsert_department(&mut self, department: Department) {
        self.departments.insert(department.id.clone(), department);
    }
}

impl OrgDirectory for InMemoryOrgDirectory {
    fn user_by_id(&self, user_id: &str) -> Option<DirectoryUser> {
        self.by_id.get(user_id).map(|&index| self.users[index].clone())
    }

    fn department(&self, department_id: &str) -> Option<Department> {
        self.departments.get(department_id).cloned()
    }

    fn department_by_name(&self, name: &str) -> Option<Department> {
        self.departments.values().find(|d| d.name == name).cloned()
    }

    fn users(&self) -> Vec<DirectoryUser> {
        self.users.clone()
    }
}
