//! Token ledger: per-user balance, monthly renewal and the append-only
//! `token_transactions` log.
//!
//! Every balance mutation is a single conditional UPDATE executed in the same
//! SQLite transaction as its log insert, so two processes sharing a workspace
//! cannot overdraw an account or renew it twice in one month.

use chrono::{DateTime, Datelike, SecondsFormat, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// Quota used for roles without a `role_configs` row and without a built-in default.
pub const DEFAULT_MONTHLY_QUOTA: i64 = 10;

pub const TX_DEBIT: &str = "debit";
pub const TX_CREDIT: &str = "credit";
pub const TX_MONTHLY_RENEWAL: &str = "monthly_renewal";
pub const TX_ADMIN_SET: &str = "admin_set";
pub const TX_ADMIN_RESET: &str = "admin_reset";
pub const TX_ROLE_CHANGE: &str = "role_change";

const SOURCE_SYSTEM: &str = "system";
const SOURCE_ADMIN: &str = "admin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Trainer,
    Admin,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Student, Role::Trainer, Role::Admin];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Trainer => "trainer",
            Self::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "student" => Some(Self::Student),
            "trainer" => Some(Self::Trainer),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    /// Built-in quota when no `role_configs` row exists.
    pub fn default_quota(self) -> i64 {
        match self {
            Self::Student => 10,
            Self::Trainer => 50,
            Self::Admin => 1000,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("amount must be positive, got {0}")]
    InvalidAmount(i64),

    #[error("insufficient tokens: balance {balance}, requested {requested}")]
    InsufficientTokens { balance: i64, requested: i64 },

    #[error("{field} must not be negative, got {value}")]
    NegativeValue { field: &'static str, value: i64 },

    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub user_id: String,
    pub role: String,
    pub monthly_token_quota: i64,
    pub token_balance: i64,
    pub token_renewal_date: Option<String>,
    pub quota_override: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenTransaction {
    pub id: String,
    pub user_id: String,
    pub amount: i64,
    pub balance_after: i64,
    pub transaction_type: String,
    pub reason: String,
    pub source: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleConfig {
    pub role: String,
    pub monthly_quota: i64,
    pub configured: bool,
}

/// Fixed-width UTC timestamp; string order matches time order.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// First instant of `now`'s calendar month, UTC.
pub fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

fn renewal_due(last_renewal: Option<&str>, boundary: &str) -> bool {
    match last_renewal {
        None => true,
        Some(ts) => ts < boundary,
    }
}

pub fn quota_for_role(conn: &Connection, role: &str) -> Result<i64> {
    let configured: Option<i64> = conn
        .query_row(
            "SELECT monthly_quota FROM role_configs WHERE role = ?",
            [role],
            |r| r.get(0),
        )
        .optional()?;
    Ok(configured.unwrap_or_else(|| {
        Role::parse(role)
            .map(Role::default_quota)
            .unwrap_or(DEFAULT_MONTHLY_QUOTA)
    }))
}

pub fn list_role_configs(conn: &Connection) -> Result<Vec<RoleConfig>> {
    let mut out = Vec::with_capacity(Role::ALL.len());
    for role in Role::ALL {
        let configured: Option<i64> = conn
            .query_row(
                "SELECT monthly_quota FROM role_configs WHERE role = ?",
                [role.as_str()],
                |r| r.get(0),
            )
            .optional()?;
        out.push(RoleConfig {
            role: role.as_str().to_string(),
            monthly_quota: configured.unwrap_or_else(|| role.default_quota()),
            configured: configured.is_some(),
        });
    }
    Ok(out)
}

pub fn upsert_role_config(
    conn: &Connection,
    role: Role,
    monthly_quota: i64,
    now: DateTime<Utc>,
) -> Result<()> {
    if monthly_quota < 0 {
        return Err(LedgerError::NegativeValue {
            field: "monthlyQuota",
            value: monthly_quota,
        });
    }
    conn.execute(
        "INSERT INTO role_configs(role, monthly_quota, updated_at) VALUES(?, ?, ?)
         ON CONFLICT(role) DO UPDATE SET
           monthly_quota = excluded.monthly_quota,
           updated_at = excluded.updated_at",
        params![role.as_str(), monthly_quota, timestamp(now)],
    )?;
    info!(role = %role, monthly_quota, "role quota updated");
    Ok(())
}

pub fn load_account(conn: &Connection, user_id: &str) -> Result<Account> {
    conn.query_row(
        "SELECT id, role, monthly_token_quota, token_balance, token_renewal_date, quota_override
         FROM users WHERE id = ?",
        [user_id],
        |r| {
            Ok(Account {
                user_id: r.get(0)?,
                role: r.get(1)?,
                monthly_token_quota: r.get(2)?,
                token_balance: r.get(3)?,
                token_renewal_date: r.get(4)?,
                quota_override: r.get::<_, i64>(5)? != 0,
            })
        },
    )
    .optional()?
    .ok_or_else(|| LedgerError::UserNotFound(user_id.to_string()))
}

fn current_balance(conn: &Connection, user_id: &str) -> Result<i64> {
    conn.query_row(
        "SELECT token_balance FROM users WHERE id = ?",
        [user_id],
        |r| r.get(0),
    )
    .optional()?
    .ok_or_else(|| LedgerError::UserNotFound(user_id.to_string()))
}

/// Quota a renewal or reset refills to: the admin override if set, else the role's.
fn effective_quota(conn: &Connection, account: &Account) -> Result<i64> {
    if account.quota_override {
        Ok(account.monthly_token_quota)
    } else {
        quota_for_role(conn, &account.role)
    }
}

#[allow(clippy::too_many_arguments)]
fn insert_transaction(
    conn: &Connection,
    user_id: &str,
    amount: i64,
    balance_after: i64,
    transaction_type: &str,
    reason: &str,
    source: &str,
    now: DateTime<Utc>,
) -> Result<TokenTransaction> {
    let entry = TokenTransaction {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        amount,
        balance_after,
        transaction_type: transaction_type.to_string(),
        reason: reason.to_string(),
        source: source.to_string(),
        created_at: timestamp(now),
    };
    conn.execute(
        "INSERT INTO token_transactions(
            id, user_id, amount, balance_after, transaction_type, reason, source, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            entry.id,
            entry.user_id,
            entry.amount,
            entry.balance_after,
            entry.transaction_type,
            entry.reason,
            entry.source,
            entry.created_at,
        ],
    )?;
    Ok(entry)
}

/// Takes the write lock up front so a read-then-write path waits on the busy
/// timeout instead of failing the lock upgrade against another process.
fn write_transaction(conn: &Connection) -> Result<Transaction<'_>> {
    Ok(Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?)
}

/// Refills the balance when the last renewal predates the current month.
///
/// Returns the logged `monthly_renewal` entry, or `None` when the account was
/// already renewed this month. The delta may be zero or negative.
pub fn ensure_monthly_renewal(
    conn: &Connection,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<Option<TokenTransaction>> {
    let boundary = timestamp(month_start(now));
    let tx = write_transaction(conn)?;
    let account = load_account(&tx, user_id)?;
    if !renewal_due(account.token_renewal_date.as_deref(), &boundary) {
        return Ok(None);
    }
    let quota = effective_quota(&tx, &account)?;
    let changed = tx.execute(
        "UPDATE users
         SET token_balance = ?1, monthly_token_quota = ?1, token_renewal_date = ?2
         WHERE id = ?3 AND (token_renewal_date IS NULL OR token_renewal_date < ?4)",
        params![quota, timestamp(now), user_id, boundary],
    )?;
    if changed == 0 {
        return Ok(None);
    }
    let entry = insert_transaction(
        &tx,
        user_id,
        quota - account.token_balance,
        quota,
        TX_MONTHLY_RENEWAL,
        TX_MONTHLY_RENEWAL,
        SOURCE_SYSTEM,
        now,
    )?;
    tx.commit()?;
    info!(
        user_id,
        quota,
        delta = entry.amount,
        "monthly token renewal applied"
    );
    Ok(Some(entry))
}

pub fn deduct(
    conn: &Connection,
    user_id: &str,
    amount: i64,
    reason: &str,
    source: &str,
    now: DateTime<Utc>,
) -> Result<TokenTransaction> {
    if amount <= 0 {
        return Err(LedgerError::InvalidAmount(amount));
    }
    let tx = write_transaction(conn)?;
    let changed = tx.execute(
        "UPDATE users SET token_balance = token_balance - ?1
         WHERE id = ?2 AND token_balance >= ?1",
        params![amount, user_id],
    )?;
    if changed == 0 {
        let balance = current_balance(&tx, user_id)?;
        return Err(LedgerError::InsufficientTokens {
            balance,
            requested: amount,
        });
    }
    let balance_after = current_balance(&tx, user_id)?;
    let entry = insert_transaction(
        &tx,
        user_id,
        -amount,
        balance_after,
        TX_DEBIT,
        reason,
        source,
        now,
    )?;
    tx.commit()?;
    debug!(user_id, amount, balance_after, reason, "tokens deducted");
    Ok(entry)
}

pub fn add(
    conn: &Connection,
    user_id: &str,
    amount: i64,
    reason: &str,
    source: &str,
    now: DateTime<Utc>,
) -> Result<TokenTransaction> {
    if amount <= 0 {
        return Err(LedgerError::InvalidAmount(amount));
    }
    let tx = write_transaction(conn)?;
    let changed = tx.execute(
        "UPDATE users SET token_balance = token_balance + ?1 WHERE id = ?2",
        params![amount, user_id],
    )?;
    if changed == 0 {
        return Err(LedgerError::UserNotFound(user_id.to_string()));
    }
    let balance_after = current_balance(&tx, user_id)?;
    let entry = insert_transaction(
        &tx,
        user_id,
        amount,
        balance_after,
        TX_CREDIT,
        reason,
        source,
        now,
    )?;
    tx.commit()?;
    debug!(user_id, amount, balance_after, reason, "tokens added");
    Ok(entry)
}

/// Signed admin adjustment: positive credits, negative debits (and may fail on
/// an insufficient balance), zero is a no-op.
pub fn admin_adjust(
    conn: &Connection,
    user_id: &str,
    adjust: i64,
    now: DateTime<Utc>,
) -> Result<Option<TokenTransaction>> {
    match adjust {
        0 => Ok(None),
        a if a > 0 => add(conn, user_id, a, "admin_adjustment", SOURCE_ADMIN, now).map(Some),
        a => {
            let amount = a.checked_neg().ok_or(LedgerError::InvalidAmount(a))?;
            deduct(conn, user_id, amount, "admin_adjustment", SOURCE_ADMIN, now).map(Some)
        }
    }
}

/// Sets quota and/or balance directly. A quota set marks the account as
/// overridden; a balance set is logged with its delta when non-zero.
pub fn admin_set_tokens(
    conn: &Connection,
    user_id: &str,
    monthly_quota: Option<i64>,
    balance: Option<i64>,
    now: DateTime<Utc>,
) -> Result<Option<TokenTransaction>> {
    if let Some(q) = monthly_quota.filter(|q| *q < 0) {
        return Err(LedgerError::NegativeValue {
            field: "monthlyTokenQuota",
            value: q,
        });
    }
    if let Some(b) = balance.filter(|b| *b < 0) {
        return Err(LedgerError::NegativeValue {
            field: "tokenBalance",
            value: b,
        });
    }

    let tx = write_transaction(conn)?;
    let account = load_account(&tx, user_id)?;
    if let Some(q) = monthly_quota {
        tx.execute(
            "UPDATE users SET monthly_token_quota = ?, quota_override = 1 WHERE id = ?",
            params![q, user_id],
        )?;
    }
    let mut entry = None;
    if let Some(b) = balance {
        tx.execute(
            "UPDATE users SET token_balance = ? WHERE id = ?",
            params![b, user_id],
        )?;
        let delta = b - account.token_balance;
        if delta != 0 {
            entry = Some(insert_transaction(
                &tx,
                user_id,
                delta,
                b,
                TX_ADMIN_SET,
                TX_ADMIN_SET,
                SOURCE_ADMIN,
                now,
            )?);
        }
    }
    tx.commit()?;
    info!(user_id, ?monthly_quota, ?balance, "admin token override");
    Ok(entry)
}

/// Resets the balance to the account's effective quota. Always logged.
pub fn admin_reset_balance(
    conn: &Connection,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<TokenTransaction> {
    let tx = write_transaction(conn)?;
    let account = load_account(&tx, user_id)?;
    let quota = effective_quota(&tx, &account)?;
    tx.execute(
        "UPDATE users SET token_balance = ? WHERE id = ?",
        params![quota, user_id],
    )?;
    let entry = insert_transaction(
        &tx,
        user_id,
        quota - account.token_balance,
        quota,
        TX_ADMIN_RESET,
        "Balance reset by admin",
        SOURCE_ADMIN,
        now,
    )?;
    tx.commit()?;
    info!(user_id, quota, "balance reset by admin");
    Ok(entry)
}

/// Moves the account to `role`, taking that role's quota and clearing any
/// override. With `reset_balance` the balance is refilled to the new quota.
pub fn change_role(
    conn: &Connection,
    user_id: &str,
    role: Role,
    reset_balance: bool,
    now: DateTime<Utc>,
) -> Result<(Account, Option<TokenTransaction>)> {
    let tx = write_transaction(conn)?;
    let before = load_account(&tx, user_id)?;
    let quota = quota_for_role(&tx, role.as_str())?;
    tx.execute(
        "UPDATE users SET role = ?, monthly_token_quota = ?, quota_override = 0 WHERE id = ?",
        params![role.as_str(), quota, user_id],
    )?;
    let mut entry = None;
    if reset_balance {
        tx.execute(
            "UPDATE users SET token_balance = ? WHERE id = ?",
            params![quota, user_id],
        )?;
        let delta = quota - before.token_balance;
        if delta != 0 {
            entry = Some(insert_transaction(
                &tx,
                user_id,
                delta,
                quota,
                TX_ROLE_CHANGE,
                TX_ROLE_CHANGE,
                SOURCE_ADMIN,
                now,
            )?);
        }
    }
    let after = load_account(&tx, user_id)?;
    tx.commit()?;
    info!(user_id, from = %before.role, to = %role, reset_balance, "role changed");
    Ok((after, entry))
}

/// Newest first.
pub fn history(conn: &Connection, user_id: &str, limit: i64) -> Result<Vec<TokenTransaction>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, amount, balance_after, transaction_type, reason, source, created_at
         FROM token_transactions
         WHERE user_id = ?
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?",
    )?;
    let rows = stmt
        .query_map(params![user_id, limit.max(0)], |r| {
            Ok(TokenTransaction {
                id: r.get(0)?,
                user_id: r.get(1)?,
                amount: r.get(2)?,
                balance_after: r.get(3)?,
                transaction_type: r.get(4)?,
                reason: r.get(5)?,
                source: r.get(6)?,
                created_at: r.get(7)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).single().expect("valid date")
    }

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        conn
    }

    fn insert_user(conn: &Connection, id: &str, role: &str, balance: i64, renewed: Option<&str>) {
        conn.execute(
            "INSERT INTO users(id, name, email, password_hash, role, monthly_token_quota,
                               token_balance, token_renewal_date, created_at)
             VALUES(?, ?, ?, 'x', ?, ?, ?, ?, '2026-01-01T00:00:00.000Z')",
            params![
                id,
                format!("User {id}"),
                format!("{id}@example.com"),
                role,
                balance,
                balance,
                renewed
            ],
        )
        .expect("insert user");
    }

    fn ledger_sum(conn: &Connection, user_id: &str) -> i64 {
        conn.query_row(
            "SELECT COALESCE(SUM(amount), 0) FROM token_transactions WHERE user_id = ?",
            [user_id],
            |r| r.get(0),
        )
        .expect("sum")
    }

    #[test]
    fn deduct_more_than_balance_fails_without_mutation() {
        let conn = setup();
        insert_user(&conn, "u1", "student", 3, Some("2026-03-01T00:00:00.000Z"));

        let res = deduct(&conn, "u1", 4, "lesson_create", "app", at(2026, 3, 5));
        match res {
            Err(LedgerError::InsufficientTokens { balance, requested }) => {
                assert_eq!(balance, 3);
                assert_eq!(requested, 4);
            }
            other => panic!("expected insufficient tokens, got {other:?}"),
        }
        assert_eq!(load_account(&conn, "u1").expect("account").token_balance, 3);
        assert!(history(&conn, "u1", 10).expect("history").is_empty());
    }

    #[test]
    fn non_positive_amounts_are_rejected() {
        let conn = setup();
        insert_user(&conn, "u1", "student", 5, None);
        assert!(matches!(
            deduct(&conn, "u1", 0, "r", "app", at(2026, 3, 5)),
            Err(LedgerError::InvalidAmount(0))
        ));
        assert!(matches!(
            add(&conn, "u1", -2, "r", "app", at(2026, 3, 5)),
            Err(LedgerError::InvalidAmount(-2))
        ));
        assert_eq!(load_account(&conn, "u1").expect("account").token_balance, 5);
    }

    #[test]
    fn deduct_then_add_restores_balance_and_deltas_cancel() {
        let conn = setup();
        insert_user(&conn, "u1", "trainer", 20, Some("2026-03-01T00:00:00.000Z"));
        let now = at(2026, 3, 9);

        let debit = deduct(&conn, "u1", 7, "lesson_create", "app", now).expect("deduct");
        assert_eq!(debit.amount, -7);
        assert_eq!(debit.balance_after, 13);
        let credit = add(&conn, "u1", 7, "refund", "app", now).expect("add");
        assert_eq!(credit.amount, 7);
        assert_eq!(credit.balance_after, 20);

        assert_eq!(load_account(&conn, "u1").expect("account").token_balance, 20);
        let entries = history(&conn, "u1", 10).expect("history");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries.iter().map(|e| e.amount).sum::<i64>(), 0);
    }

    #[test]
    fn renewal_applies_once_per_calendar_month() {
        let conn = setup();
        insert_user(&conn, "u1", "student", 2, Some("2026-02-20T08:00:00.000Z"));

        let first = ensure_monthly_renewal(&conn, "u1", at(2026, 3, 2))
            .expect("renew")
            .expect("renewal due");
        assert_eq!(first.transaction_type, TX_MONTHLY_RENEWAL);
        assert_eq!(first.amount, 8);
        assert_eq!(first.balance_after, 10);

        deduct(&conn, "u1", 4, "lesson_create", "app", at(2026, 3, 3)).expect("deduct");
        for day in [3, 15, 31] {
            assert!(ensure_monthly_renewal(&conn, "u1", at(2026, 3, day))
                .expect("renew")
                .is_none());
        }
        assert_eq!(load_account(&conn, "u1").expect("account").token_balance, 6);

        let april = ensure_monthly_renewal(&conn, "u1", at(2026, 4, 1))
            .expect("renew")
            .expect("april renewal");
        assert_eq!(april.amount, 4);
        assert_eq!(load_account(&conn, "u1").expect("account").token_balance, 10);
        assert_eq!(ledger_sum(&conn, "u1"), 8);
    }

    #[test]
    fn renewal_logs_zero_delta_and_seeds_missing_timestamp() {
        let conn = setup();
        insert_user(&conn, "u1", "student", 10, None);
        let entry = ensure_monthly_renewal(&conn, "u1", at(2026, 5, 10))
            .expect("renew")
            .expect("first load renews");
        assert_eq!(entry.amount, 0);
        let account = load_account(&conn, "u1").expect("account");
        assert_eq!(
            account.token_renewal_date.as_deref(),
            Some("2026-05-10T12:00:00.000Z")
        );
    }

    #[test]
    fn renewal_uses_configured_role_quota_unless_overridden() {
        let conn = setup();
        insert_user(&conn, "u1", "trainer", 0, Some("2026-01-15T00:00:00.000Z"));
        insert_user(&conn, "u2", "trainer", 0, Some("2026-01-15T00:00:00.000Z"));
        upsert_role_config(&conn, Role::Trainer, 75, at(2026, 1, 20)).expect("config");
        admin_set_tokens(&conn, "u2", Some(5), None, at(2026, 1, 20)).expect("override");

        ensure_monthly_renewal(&conn, "u1", at(2026, 2, 1)).expect("renew u1");
        ensure_monthly_renewal(&conn, "u2", at(2026, 2, 1)).expect("renew u2");

        let a1 = load_account(&conn, "u1").expect("u1");
        assert_eq!((a1.monthly_token_quota, a1.token_balance), (75, 75));
        let a2 = load_account(&conn, "u2").expect("u2");
        assert_eq!((a2.monthly_token_quota, a2.token_balance), (5, 5));
    }

    #[test]
    fn role_quota_falls_back_to_defaults() {
        let conn = setup();
        assert_eq!(quota_for_role(&conn, "student").expect("q"), 10);
        assert_eq!(quota_for_role(&conn, "trainer").expect("q"), 50);
        assert_eq!(quota_for_role(&conn, "admin").expect("q"), 1000);
        assert_eq!(
            quota_for_role(&conn, "visitor").expect("q"),
            DEFAULT_MONTHLY_QUOTA
        );

        upsert_role_config(&conn, Role::Student, 3, at(2026, 1, 1)).expect("config");
        assert_eq!(quota_for_role(&conn, "student").expect("q"), 3);
        let listed = list_role_configs(&conn).expect("list");
        assert_eq!(listed.len(), 3);
        assert!(listed
            .iter()
            .any(|c| c.role == "student" && c.configured && c.monthly_quota == 3));
        assert!(listed
            .iter()
            .any(|c| c.role == "trainer" && !c.configured && c.monthly_quota == 50));
    }

    #[test]
    fn admin_set_logs_balance_delta_and_rejects_negative() {
        let conn = setup();
        insert_user(&conn, "u1", "student", 4, Some("2026-03-01T00:00:00.000Z"));
        let now = at(2026, 3, 4);

        let entry = admin_set_tokens(&conn, "u1", None, Some(9), now)
            .expect("set")
            .expect("logged");
        assert_eq!(entry.amount, 5);
        assert_eq!(entry.transaction_type, TX_ADMIN_SET);
        assert!(admin_set_tokens(&conn, "u1", None, Some(9), now)
            .expect("same value")
            .is_none());
        assert!(matches!(
            admin_set_tokens(&conn, "u1", None, Some(-1), now),
            Err(LedgerError::NegativeValue { .. })
        ));
        assert_eq!(ledger_sum(&conn, "u1"), 5);
    }

    #[test]
    fn admin_adjust_negative_respects_balance() {
        let conn = setup();
        insert_user(&conn, "u1", "student", 2, Some("2026-03-01T00:00:00.000Z"));
        let now = at(2026, 3, 4);
        assert!(matches!(
            admin_adjust(&conn, "u1", -3, now),
            Err(LedgerError::InsufficientTokens { .. })
        ));
        assert!(admin_adjust(&conn, "u1", 0, now).expect("noop").is_none());
        let e = admin_adjust(&conn, "u1", -2, now).expect("ok").expect("entry");
        assert_eq!(e.balance_after, 0);
    }

    #[test]
    fn admin_adjust_rejects_unrepresentable_debit() {
        let conn = setup();
        insert_user(&conn, "u1", "student", 5, Some("2026-03-01T00:00:00.000Z"));
        assert!(matches!(
            admin_adjust(&conn, "u1", i64::MIN, at(2026, 3, 4)),
            Err(LedgerError::InvalidAmount(i64::MIN))
        ));
        assert_eq!(load_account(&conn, "u1").expect("account").token_balance, 5);
        assert_eq!(ledger_sum(&conn, "u1"), 0);
    }

    #[test]
    fn concurrent_deductions_across_connections_never_overdraw() {
        let dir = tempfile::tempdir().expect("tempdir");
        let workspace = dir.path().to_path_buf();
        let opening = 50;
        {
            let conn = db::open_db(&workspace).expect("open");
            insert_user(&conn, "u1", "student", opening, Some("2026-03-01T00:00:00.000Z"));
        }

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let workspace = workspace.clone();
                std::thread::spawn(move || {
                    let conn = db::open_db(&workspace).expect("open");
                    let mut granted = 0;
                    for _ in 0..30 {
                        match deduct(&conn, "u1", 1, "lesson_create", "app", at(2026, 3, 5)) {
                            Ok(_) => granted += 1,
                            Err(LedgerError::InsufficientTokens { .. }) => {}
                            Err(e) => panic!("unexpected ledger error: {e}"),
                        }
                    }
                    granted
                })
            })
            .collect();
        let granted: i64 = workers
            .into_iter()
            .map(|w| w.join().expect("worker"))
            .sum();

        let conn = db::open_db(&workspace).expect("reopen");
        let balance = load_account(&conn, "u1").expect("account").token_balance;
        assert!(balance >= 0);
        assert_eq!(granted, opening);
        assert_eq!(balance, 0);
        assert_eq!(opening + ledger_sum(&conn, "u1"), balance);
    }

    #[test]
    fn mixed_admin_writes_and_deductions_share_a_workspace() {
        let dir = tempfile::tempdir().expect("tempdir");
        let workspace = dir.path().to_path_buf();
        let opening = 10;
        {
            let conn = db::open_db(&workspace).expect("open");
            insert_user(&conn, "u1", "student", opening, Some("2026-03-01T00:00:00.000Z"));
        }

        let workers: Vec<_> = (0..4)
            .map(|w| {
                let workspace = workspace.clone();
                std::thread::spawn(move || {
                    let conn = db::open_db(&workspace).expect("open");
                    let now = at(2026, 3, 5);
                    for i in 0..20 {
                        let res = match (w + i) % 4 {
                            0 => admin_reset_balance(&conn, "u1", now).map(|_| ()),
                            1 => admin_set_tokens(&conn, "u1", None, Some(7), now).map(|_| ()),
                            2 => ensure_monthly_renewal(&conn, "u1", now).map(|_| ()),
                            _ => deduct(&conn, "u1", 2, "lesson_create", "app", now).map(|_| ()),
                        };
                        match res {
                            Ok(()) | Err(LedgerError::InsufficientTokens { .. }) => {}
                            Err(e) => panic!("unexpected ledger error: {e}"),
                        }
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().expect("worker");
        }

        let conn = db::open_db(&workspace).expect("reopen");
        let balance = load_account(&conn, "u1").expect("account").token_balance;
        assert!(balance >= 0);
        assert_eq!(opening + ledger_sum(&conn, "u1"), balance);
    }

    #[test]
    fn change_role_resets_balance_to_new_quota() {
        let conn = setup();
        insert_user(&conn, "u1", "student", 1, Some("2026-03-01T00:00:00.000Z"));
        let (account, entry) =
            change_role(&conn, "u1", Role::Trainer, true, at(2026, 3, 4)).expect("change");
        assert_eq!(account.role, "trainer");
        assert_eq!(account.monthly_token_quota, 50);
        assert_eq!(account.token_balance, 50);
        assert_eq!(entry.expect("logged").amount, 49);

        let reset = admin_reset_balance(&conn, "u1", at(2026, 3, 5)).expect("reset");
        assert_eq!(reset.amount, 0);
        assert_eq!(reset.transaction_type, TX_ADMIN_RESET);
    }

    #[test]
    fn unknown_user_is_reported() {
        let conn = setup();
        assert!(matches!(
            deduct(&conn, "ghost", 1, "r", "app", at(2026, 3, 4)),
            Err(LedgerError::UserNotFound(_))
        ));
        assert!(matches!(
            ensure_monthly_renewal(&conn, "ghost", at(2026, 3, 4)),
            Err(LedgerError::UserNotFound(_))
        ));
    }

    #[test]
    fn month_start_is_first_instant_utc() {
        let start = month_start(at(2026, 12, 31));
        assert_eq!(timestamp(start), "2026-12-01T00:00:00.000Z");
    }
}
