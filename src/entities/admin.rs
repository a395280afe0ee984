// Admin users - who may use the dashboard endpoints

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db::now_timestamp;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdminUser {
    pub id: i64,
    pub email: String,
    pub name: Option<String>,
    pub role: String,
    pub is_active: bool,
    pub created_at: String,
}

/// Outcome of an admin lookup
#[derive(Debug, Clone, PartialEq)]
pub enum AdminAccess {
    Granted(AdminUser),
    Inactive(AdminUser),
    Unknown,
}

impl AdminAccess {
    pub fn is_granted(&self) -> bool {
        matches!(self, AdminAccess::Granted(_))
    }
}

fn row_to_admin(row: &rusqlite::Row<'_>) -> rusqlite::Result<AdminUser> {
    Ok(AdminUser {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        role: row.get(3)?,
        is_active: row.get(4)?,
        created_at: row.get(5)?,
    })
}

pub fn find_admin(conn: &Connection, email: &str) -> Result<Option<AdminUser>> {
    let admin = conn
        .query_row(
            "SELECT id, email, name, role, is_active, created_at
             FROM admin_users WHERE email = ?1",
            [email.trim()],
            row_to_admin,
        )
        .optional()?;
    Ok(admin)
}

pub fn check_admin_access(conn: &Connection, email: &str) -> Result<AdminAccess> {
    Ok(match find_admin(conn, email)? {
        Some(admin) if admin.is_active => AdminAccess::Granted(admin),
        Some(admin) => AdminAccess::Inactive(admin),
        None => AdminAccess::Unknown,
    })
}

/// Insert an admin, or re-activate an existing one.
pub fn upsert_admin(conn: &Connection, email: &str, name: Option<&str>, active: bool) -> Result<AdminUser> {
    conn.execute(
        "INSERT INTO admin_users (email, name, role, is_active, created_at)
         VALUES (?1, ?2, 'admin', ?3, ?4)
         ON CONFLICT(email) DO UPDATE SET
            name = COALESCE(excluded.name, admin_users.name),
            is_active = excluded.is_active",
        params![email.trim(), name, active, now_timestamp()],
    )?;

    find_admin(conn, email)?.ok_or_else(|| anyhow::anyhow!("admin {email} vanished after upsert"))
}

pub fn list_admins(conn: &Connection) -> Result<Vec<AdminUser>> {
    let mut stmt = conn.prepare(
        "SELECT id, email, name, role, is_active, created_at
         FROM admin_users ORDER BY email",
    )?;
    let admins = stmt
        .query_map([], row_to_admin)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(admins)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_unknown_email_is_not_admin() {
        let conn = test_db();
        assert_eq!(check_admin_access(&conn, "nobody@example.com").unwrap(), AdminAccess::Unknown);
    }

    #[test]
    fn test_inactive_admin_is_refused() {
        let conn = test_db();
        upsert_admin(&conn, "old@example.com", Some("Old"), false).unwrap();

        let access = check_admin_access(&conn, "old@example.com").unwrap();
        assert!(matches!(access, AdminAccess::Inactive(_)));
        assert!(!access.is_granted());
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let conn = test_db();
        upsert_admin(&conn, "Boss@Example.com", None, true).unwrap();

        assert!(check_admin_access(&conn, "boss@example.com").unwrap().is_granted());
    }

    #[test]
    fn test_upsert_reactivates_and_keeps_name() {
        let conn = test_db();
        upsert_admin(&conn, "a@example.com", Some("Alice"), false).unwrap();
        let admin = upsert_admin(&conn, "a@example.com", None, true).unwrap();

        assert!(admin.is_active);
        assert_eq!(admin.name.as_deref(), Some("Alice"));
        assert_eq!(list_admins(&conn).unwrap().len(), 1);
    }
}
