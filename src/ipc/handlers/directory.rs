//! Directory rows (schools, memberships, classes) that the guard resolves
//! against. Only admins may write them.

use crate::abac::Role;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{caller, get_required_str, no_workspace};
use crate::ipc::types::{AppState, Request};
use crate::store::access;
use rusqlite::Connection;
use serde_json::json;

fn admin_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    let Some(conn) = state.db.as_ref() else {
        return Err(no_workspace(req));
    };
    if caller(req).role != Role::Admin {
        return Err(err(
            &req.id,
            "permission_denied",
            "only admins may edit the directory",
            None,
        ));
    }
    Ok(conn)
}

fn require_school(conn: &Connection, req: &Request, school_id: &str) -> Result<(), serde_json::Value> {
    match access::school_exists(conn, school_id) {
        Ok(true) => Ok(()),
        Ok(false) => Err(err(&req.id, "not_found", "cannot find school", None)),
        Err(e) => Err(err(&req.id, "db_query_failed", e.to_string(), None)),
    }
}

fn handle_school_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match admin_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let (school_id, name) = match (get_required_str(req, "schoolId"), get_required_str(req, "name")) {
        (Ok(s), Ok(n)) => (s, n),
        (Err(resp), _) | (_, Err(resp)) => return resp,
    };
    if let Err(e) = access::upsert_school(conn, &school_id, &name) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "schoolId": school_id, "name": name }))
}

fn handle_teacher_link(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match admin_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let (teacher_id, school_id) =
        match (get_required_str(req, "teacherId"), get_required_str(req, "schoolId")) {
            (Ok(t), Ok(s)) => (t, s),
            (Err(resp), _) | (_, Err(resp)) => return resp,
        };
    if let Err(resp) = require_school(conn, req, &school_id) {
        return resp;
    }
    if let Err(e) = access::link_teacher(conn, &teacher_id, &school_id) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "teacherId": teacher_id, "schoolId": school_id }))
}

fn handle_school_admin_assign(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match admin_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let (user_id, school_id) = match (get_required_str(req, "userId"), get_required_str(req, "schoolId")) {
        (Ok(u), Ok(s)) => (u, s),
        (Err(resp), _) | (_, Err(resp)) => return resp,
    };
    if let Err(resp) = require_school(conn, req, &school_id) {
        return resp;
    }
    if let Err(e) = access::assign_school_admin(conn, &user_id, &school_id) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "userId": user_id, "schoolId": school_id }))
}

fn handle_class_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match admin_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let ids = (
        get_required_str(req, "classId"),
        get_required_str(req, "schoolId"),
        get_required_str(req, "name"),
    );
    let (class_id, school_id, name) = match ids {
        (Ok(c), Ok(s), Ok(n)) => (c, s, n),
        (Err(resp), _, _) | (_, Err(resp), _) | (_, _, Err(resp)) => return resp,
    };
    if let Err(resp) = require_school(conn, req, &school_id) {
        return resp;
    }
    match access::class_schools(conn, std::slice::from_ref(&class_id)) {
        Ok(owners) => {
            if let Some(owner) = owners.get(&class_id).filter(|o| **o != school_id) {
                return err(
                    &req.id,
                    "bad_params",
                    format!("class {} belongs to school {}", class_id, owner),
                    None,
                );
            }
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    if let Err(e) = access::upsert_class(conn, &class_id, &school_id, &name) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(
        &req.id,
        json!({ "classId": class_id, "schoolId": school_id, "name": name }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "directory.schoolUpsert" => Some(handle_school_upsert(state, req)),
        "directory.teacherLink" => Some(handle_teacher_link(state, req)),
        "directory.schoolAdminAssign" => Some(handle_school_admin_assign(state, req)),
        "directory.classUpsert" => Some(handle_class_upsert(state, req)),
        _ => None,
    }
}
