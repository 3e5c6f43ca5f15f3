mod test_support;

use serde_json::json;
use test_support::{
    error_code, open_workspace, register_and_login, request_as, session_ok, spawn_sidecar,
    temp_dir, ADMIN_EMAIL,
};

/// Oldest-first ledger rows must chain: each balance_after equals the
/// previous one plus the row's amount.
fn assert_ledger_chains(rows: &[serde_json::Value], opening: i64) {
    let mut balance = opening;
    for row in rows.iter().rev() {
        balance += row["amount"].as_i64().expect("amount");
        assert_eq!(row["balanceAfter"].as_i64(), Some(balance), "row {}", row);
    }
}

#[test]
fn admin_methods_require_admin_role() {
    let workspace = temp_dir("lessond-admin-gate");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);
    let (_uid, token) = register_and_login(&mut stdin, &mut reader, "Stu", "stu@school.test");

    let anon = request_as(&mut stdin, &mut reader, "1", "admin.users.list", json!({}), None);
    assert_eq!(error_code(&anon), "unauthorized");
    for (i, method) in [
        "admin.users.list",
        "admin.users.updateTokens",
        "admin.roleConfigs.upsert",
        "admin.transactions.list",
        "setup.update",
    ]
    .iter()
    .enumerate()
    {
        let resp = request_as(
            &mut stdin,
            &mut reader,
            &format!("s{}", i),
            method,
            json!({}),
            Some(token.as_str()),
        );
        assert_eq!(error_code(&resp), "forbidden", "{}", method);
    }
}

#[test]
fn admin_token_overrides_are_logged_and_reconcile() {
    let workspace = temp_dir("lessond-admin-tokens");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);
    let (_aid, admin) = register_and_login(&mut stdin, &mut reader, "Admin", ADMIN_EMAIL);
    let (uid, _token) = register_and_login(&mut stdin, &mut reader, "Tess", "tess@school.test");
    let admin = Some(admin.as_str());

    let users = session_ok(&mut stdin, &mut reader, "1", "admin.users.list", json!({}), admin);
    assert_eq!(users["users"].as_array().map(|a| a.len()), Some(2));

    let plus = session_ok(
        &mut stdin,
        &mut reader,
        "2",
        "admin.users.updateTokens",
        json!({ "userId": uid, "adjust": 5 }),
        admin,
    );
    assert_eq!(plus["account"]["tokenBalance"], 15);

    let minus = request_as(
        &mut stdin,
        &mut reader,
        "3",
        "admin.users.updateTokens",
        json!({ "userId": uid, "adjust": -100 }),
        admin,
    );
    assert_eq!(error_code(&minus), "insufficient_tokens");

    let set = session_ok(
        &mut stdin,
        &mut reader,
        "4",
        "admin.users.updateTokens",
        json!({ "userId": uid, "tokenBalance": 3, "monthlyTokenQuota": 25 }),
        admin,
    );
    assert_eq!(set["account"]["tokenBalance"], 3);
    assert_eq!(set["account"]["monthlyTokenQuota"], 25);
    assert_eq!(set["account"]["quotaOverride"], true);
    assert_eq!(set["transactions"][0]["amount"], -12);

    let negative = request_as(
        &mut stdin,
        &mut reader,
        "5",
        "admin.users.updateTokens",
        json!({ "userId": uid, "tokenBalance": -1 }),
        admin,
    );
    assert_eq!(error_code(&negative), "bad_params");
    let empty = request_as(
        &mut stdin,
        &mut reader,
        "6",
        "admin.users.updateTokens",
        json!({ "userId": uid }),
        admin,
    );
    assert_eq!(error_code(&empty), "bad_params");
    let missing = request_as(
        &mut stdin,
        &mut reader,
        "7",
        "admin.users.updateTokens",
        json!({ "userId": "no-such-user", "adjust": 1 }),
        admin,
    );
    assert_eq!(error_code(&missing), "not_found");

    // Reset uses the overridden quota.
    let reset = session_ok(
        &mut stdin,
        &mut reader,
        "8",
        "admin.users.resetBalance",
        json!({ "userId": uid }),
        admin,
    );
    assert_eq!(reset["account"]["tokenBalance"], 25);
    assert_eq!(reset["transaction"]["reason"], "Balance reset by admin");

    let log = session_ok(
        &mut stdin,
        &mut reader,
        "9",
        "admin.transactions.list",
        json!({ "userId": uid }),
        admin,
    );
    let rows = log["transactions"].as_array().expect("rows");
    assert_eq!(rows.len(), 3);
    assert_ledger_chains(rows, 10);
}

#[test]
fn role_changes_and_role_configs() {
    let workspace = temp_dir("lessond-admin-roles");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);
    let (_aid, admin) = register_and_login(&mut stdin, &mut reader, "Admin", ADMIN_EMAIL);
    let (uid, token) = register_and_login(&mut stdin, &mut reader, "Tom", "tom@school.test");
    let admin = Some(admin.as_str());

    let configs = session_ok(
        &mut stdin,
        &mut reader,
        "1",
        "admin.roleConfigs.list",
        json!({}),
        admin,
    );
    let defaults: Vec<(String, i64)> = configs["roleConfigs"]
        .as_array()
        .expect("configs")
        .iter()
        .map(|c| {
            (
                c["role"].as_str().expect("role").to_string(),
                c["monthlyQuota"].as_i64().expect("quota"),
            )
        })
        .collect();
    assert_eq!(
        defaults,
        vec![
            ("student".to_string(), 10),
            ("trainer".to_string(), 50),
            ("admin".to_string(), 1000)
        ]
    );

    let bad_role = request_as(
        &mut stdin,
        &mut reader,
        "2",
        "admin.users.updateRole",
        json!({ "userId": uid, "role": "principal" }),
        admin,
    );
    assert_eq!(error_code(&bad_role), "bad_params");

    let keep = session_ok(
        &mut stdin,
        &mut reader,
        "3",
        "admin.users.updateRole",
        json!({ "userId": uid, "role": "trainer" }),
        admin,
    );
    assert_eq!(keep["account"]["role"], "trainer");
    assert_eq!(keep["account"]["monthlyTokenQuota"], 50);
    assert_eq!(keep["account"]["tokenBalance"], 10);
    assert!(keep["transaction"].is_null());

    let upsert = session_ok(
        &mut stdin,
        &mut reader,
        "4",
        "admin.roleConfigs.upsert",
        json!({ "role": "trainer", "monthlyQuota": 40 }),
        admin,
    );
    assert_eq!(upsert["roleConfig"]["monthlyQuota"], 40);
    assert_eq!(upsert["roleConfig"]["configured"], true);
    let negative = request_as(
        &mut stdin,
        &mut reader,
        "5",
        "admin.roleConfigs.upsert",
        json!({ "role": "trainer", "monthlyQuota": -1 }),
        admin,
    );
    assert_eq!(error_code(&negative), "bad_params");

    let reset = session_ok(
        &mut stdin,
        &mut reader,
        "6",
        "admin.users.updateRole",
        json!({ "userId": uid, "role": "trainer", "resetBalance": true }),
        admin,
    );
    assert_eq!(reset["account"]["monthlyTokenQuota"], 40);
    assert_eq!(reset["account"]["tokenBalance"], 40);
    assert_eq!(reset["transaction"]["amount"], 30);

    // The promoted user sees the new balance on their next load.
    let me = session_ok(&mut stdin, &mut reader, "7", "user.get", json!({}), Some(token.as_str()));
    assert_eq!(me["user"]["role"], "trainer");
    assert_eq!(me["user"]["tokenBalance"], 40);

    let promote = session_ok(
        &mut stdin,
        &mut reader,
        "8",
        "admin.users.updateRole",
        json!({ "userId": uid, "role": "admin" }),
        admin,
    );
    assert_eq!(promote["account"]["role"], "admin");
    let _ = session_ok(
        &mut stdin,
        &mut reader,
        "9",
        "admin.users.list",
        json!({}),
        Some(token.as_str()),
    );
}
