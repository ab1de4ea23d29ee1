use crate::ipc::error::ok;
use crate::ipc::types::{AppState, Request};
use crate::roles::{menu_for, Role};
use serde_json::json;

fn roles_menu(req: &Request) -> serde_json::Value {
    // Unrecognized or missing roles get the most restricted surface.
    let role = req
        .params
        .get("role")
        .and_then(|v| v.as_str())
        .and_then(Role::parse)
        .unwrap_or(Role::Student);

    ok(
        &req.id,
        json!({
            "role": role.as_str(),
            "menu": menu_for(role),
        }),
    )
}

pub fn try_handle(_state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "roles.menu" => Some(roles_menu(req)),
        _ => None,
    }
}
