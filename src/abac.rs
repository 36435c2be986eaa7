//! Role + school-scope authorization, resolved before any write begins.
//!
//! Rules:
//! - `Admin` is unrestricted and never resolves resources.
//! - `SchoolAdmin` may touch a batch only when every resource resolves to the
//!   school recorded for that admin.
//! - `Teacher` may touch a batch only when every resolved school is one the
//!   teacher holds a membership in.
//! - Anyone else is denied. A resource whose owning school cannot be resolved
//!   denies the whole batch.

use crate::error::{OpContext, OrchestratorError, Result};
use crate::store::access;
use rusqlite::Connection;
use serde::Deserialize;
use std::collections::BTreeSet;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    SchoolAdmin,
    Teacher,
    Anonymous,
}

impl Role {
    pub fn parse(raw: &str) -> Role {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" => Role::Admin,
            "school_admin" | "schooladmin" => Role::SchoolAdmin,
            "teacher" => Role::Teacher,
            _ => Role::Anonymous,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerContext {
    pub user_id: String,
    pub role: Role,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCaller {
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    role: String,
}

impl CallerContext {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }

    /// Reads `{userId, role}`; a missing or malformed caller is anonymous.
    pub fn from_json(v: Option<&serde_json::Value>) -> Self {
        let raw = v
            .cloned()
            .and_then(|v| serde_json::from_value::<RawCaller>(v).ok());
        match raw {
            Some(r) if !r.user_id.trim().is_empty() => Self::new(r.user_id.trim(), Role::parse(&r.role)),
            _ => Self::new("", Role::Anonymous),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    School(String),
    Course(String),
    Lesson(String),
    Class(String),
}

impl Resource {
    fn describe(&self) -> String {
        match self {
            Resource::School(id) => format!("school {}", id),
            Resource::Course(id) => format!("course {}", id),
            Resource::Lesson(id) => format!("lesson {}", id),
            Resource::Class(id) => format!("class {}", id),
        }
    }
}

/// What the mutator may touch once the guard has allowed a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessScope {
    Unrestricted,
    Schools(BTreeSet<String>),
}

impl AccessScope {
    pub fn permits_school(&self, school_id: &str) -> bool {
        match self {
            AccessScope::Unrestricted => true,
            AccessScope::Schools(ids) => ids.contains(school_id),
        }
    }
}

fn resolve_school(conn: &Connection, resource: &Resource) -> Result<Option<String>> {
    match resource {
        Resource::School(id) => Ok(access::school_exists(conn, id)
            .op("resolve school")?
            .then(|| id.clone())),
        Resource::Course(id) => access::school_of_course(conn, id).op("resolve course school"),
        Resource::Lesson(id) => access::school_of_lesson(conn, id).op("resolve lesson school"),
        Resource::Class(id) => Ok(access::class_schools(conn, std::slice::from_ref(id))
            .op("resolve class school")?
            .remove(id)),
    }
}

fn resolve_all(conn: &Connection, resources: &[Resource]) -> Result<BTreeSet<String>> {
    let mut schools = BTreeSet::new();
    for r in resources {
        match resolve_school(conn, r)? {
            Some(s) => {
                schools.insert(s);
            }
            None => {
                warn!(resource = %r.describe(), "access denied: owning school not resolvable");
                return Err(OrchestratorError::denied(format!(
                    "permission denied: cannot resolve {}",
                    r.describe()
                )));
            }
        }
    }
    Ok(schools)
}

pub fn authorize(
    conn: &Connection,
    caller: &CallerContext,
    resources: &[Resource],
) -> Result<AccessScope> {
    match caller.role {
        Role::Admin => Ok(AccessScope::Unrestricted),
        Role::Anonymous => Err(OrchestratorError::denied(
            "permission denied: caller has no role",
        )),
        Role::SchoolAdmin => {
            let own = access::school_of_admin(conn, &caller.user_id)
                .op("resolve admin school")?
                .ok_or_else(|| {
                    OrchestratorError::denied("permission denied: caller is not a school admin")
                })?;
            let schools = resolve_all(conn, resources)?;
            if schools.iter().any(|s| *s != own) {
                warn!(user = %caller.user_id, "school admin denied outside own school");
                return Err(OrchestratorError::denied(
                    "permission denied: resource belongs to another school",
                ));
            }
            Ok(AccessScope::Schools(BTreeSet::from([own])))
        }
        Role::Teacher => {
            let memberships: BTreeSet<String> = access::teacher_school_ids(conn, &caller.user_id)
                .op("resolve teacher schools")?
                .into_iter()
                .collect();
            let schools = resolve_all(conn, resources)?;
            if !schools.is_subset(&memberships) {
                warn!(user = %caller.user_id, "teacher denied outside member schools");
                return Err(OrchestratorError::denied(
                    "permission denied: teacher is not a member of every school",
                ));
            }
            Ok(AccessScope::Schools(memberships))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::model::{now, Course, CourseType};
    use crate::store::courses;

    fn seed(conn: &Connection) {
        access::upsert_school(conn, "s1", "One").expect("school");
        access::upsert_school(conn, "s2", "Two").expect("school");
        access::assign_school_admin(conn, "admin-1", "s1").expect("admin");
        access::link_teacher(conn, "t-1", "s1").expect("teacher");
        for (id, school) in [("c1", "s1"), ("c2", "s2")] {
            let course = Course {
                id: id.into(),
                school_id: school.into(),
                name: id.into(),
                subject: None,
                grade: None,
                country: None,
                course_type: CourseType::Live,
                window: None,
                study_plan_id: None,
                teacher_ids: vec![],
                deleted: false,
            };
            courses::upsert(conn, &course, &now()).expect("course");
        }
    }

    #[test]
    fn admin_is_unrestricted_without_resolution() {
        let conn = db::open_in_memory().expect("db");
        let scope = authorize(
            &conn,
            &CallerContext::new("root", Role::Admin),
            &[Resource::Course("missing".into())],
        )
        .expect("allowed");
        assert_eq!(scope, AccessScope::Unrestricted);
    }

    #[test]
    fn school_admin_denied_for_mixed_batch() {
        let conn = db::open_in_memory().expect("db");
        seed(&conn);
        let caller = CallerContext::new("admin-1", Role::SchoolAdmin);
        let own = authorize(&conn, &caller, &[Resource::Course("c1".into())]).expect("own");
        assert!(own.permits_school("s1"));
        assert!(!own.permits_school("s2"));
        let mixed = authorize(
            &conn,
            &caller,
            &[Resource::Course("c1".into()), Resource::Course("c2".into())],
        );
        assert!(matches!(mixed, Err(OrchestratorError::PermissionDenied(_))));
    }

    #[test]
    fn teacher_requires_membership_in_all_schools() {
        let conn = db::open_in_memory().expect("db");
        seed(&conn);
        let caller = CallerContext::new("t-1", Role::Teacher);
        assert!(authorize(&conn, &caller, &[Resource::Course("c1".into())]).is_ok());
        assert!(matches!(
            authorize(&conn, &caller, &[Resource::Course("c1".into()), Resource::Course("c2".into())]),
            Err(OrchestratorError::PermissionDenied(_))
        ));
    }

    #[test]
    fn unresolvable_resource_fails_closed() {
        let conn = db::open_in_memory().expect("db");
        seed(&conn);
        let caller = CallerContext::new("admin-1", Role::SchoolAdmin);
        let res = authorize(&conn, &caller, &[Resource::Course("ghost".into())]);
        assert!(matches!(res, Err(OrchestratorError::PermissionDenied(_))));
        let anon = CallerContext::from_json(None);
        assert_eq!(anon.role, Role::Anonymous);
        assert!(authorize(&conn, &anon, &[]).is_err());
    }

    #[test]
    fn caller_parses_from_json() {
        let v = serde_json::json!({ "userId": "u1", "role": "school_admin" });
        let c = CallerContext::from_json(Some(&v));
        assert_eq!(c, CallerContext::new("u1", Role::SchoolAdmin));
    }
}
