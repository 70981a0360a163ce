use chrono::{Duration, Utc};
use rusqlite::{Connection, OptionalExtension};

use super::{Db, conversion_err, exists_on, log_activity, now, parse_dt, timestamp};
use crate::auth::{hash_password, verify_password};
use crate::error::StoirError;
use crate::id::generate_token;
use crate::types::{BootstrapStatus, NewUser, Role, Session, User};

const MIN_PASSWORD_LEN: usize = 6;
const SESSION_TTL_HOURS: i64 = 12;

fn user_from_row(row: &rusqlite::Row) -> Result<User, rusqlite::Error> {
    let role_str: String = row.get("role")?;
    let created_at_str: String = row.get("created_at")?;
    Ok(User {
        username: row.get("username")?,
        display_name: row.get("display_name")?,
        role: role_str.parse().map_err(conversion_err)?,
        created_at: parse_dt(&created_at_str)?,
    })
}

fn validate_credentials(username: &str, password: &str) -> Result<(), StoirError> {
    if username.trim().is_empty() {
        return Err(StoirError::InvalidArgument("username must not be empty".into()));
    }
    if username.chars().any(char::is_whitespace) {
        return Err(StoirError::InvalidArgument(
            "username must not contain whitespace".into(),
        ));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(StoirError::InvalidArgument(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

fn insert_user(conn: &Connection, new: &NewUser) -> Result<(), StoirError> {
    validate_credentials(&new.username, &new.password)?;
    if exists_on(conn, "SELECT 1 FROM users WHERE username = ?1", &new.username)? {
        return Err(StoirError::already_exists("user", new.username.as_str()));
    }

    let display_name = new
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .unwrap_or(new.username.as_str());
    let hashed = hash_password(&new.password);
    conn.execute(
        "INSERT INTO users (username, display_name, role, password_hash, salt, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            new.username,
            display_name,
            new.role.as_str(),
            hashed.hash,
            hashed.salt,
            now()
        ],
    )
    .map_err(|e| StoirError::Internal(format!("failed to insert user: {e}")))?;
    Ok(())
}

impl Db {
    fn user_count(&self) -> Result<i64, StoirError> {
        self.conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .map_err(|e| StoirError::Internal(format!("failed to count users: {e}")))
    }

    pub fn bootstrap_status(&self) -> Result<BootstrapStatus, StoirError> {
        Ok(BootstrapStatus {
            needs_setup: self.user_count()? == 0,
        })
    }

    /// Creates the first account. Only allowed while no user exists.
    pub fn setup_owner(
        &self,
        username: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<User, StoirError> {
        if self.user_count()? > 0 {
            return Err(StoirError::SetupComplete);
        }
        let new = NewUser {
            username: username.to_string(),
            display_name: display_name.map(String::from),
            role: Role::Owner,
            password: password.to_string(),
        };
        self.write(|conn| {
            insert_user(conn, &new)?;
            log_activity(conn, username, "setup", "user", username, None)
        })?;
        tracing::info!(username, "owner account created");
        self.get_user(username)
    }

    pub fn create_user(&self, new: &NewUser, actor: &str) -> Result<User, StoirError> {
        self.write(|conn| {
            insert_user(conn, new)?;
            log_activity(
                conn,
                actor,
                "create",
                "user",
                &new.username,
                Some(new.role.as_str()),
            )
        })?;
        self.get_user(&new.username)
    }

    pub fn get_user(&self, username: &str) -> Result<User, StoirError> {
        self.conn
            .query_row(
                "SELECT * FROM users WHERE username = ?1",
                rusqlite::params![username],
                user_from_row,
            )
            .optional()
            .map_err(|e| StoirError::Internal(format!("failed to query user: {e}")))?
            .ok_or_else(|| StoirError::not_found("user", username))
    }

    pub fn list_users(&self) -> Result<Vec<User>, StoirError> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM users ORDER BY created_at, username")
            .map_err(|e| StoirError::Internal(format!("failed to prepare user query: {e}")))?;
        let users = stmt
            .query_map([], user_from_row)
            .map_err(|e| StoirError::Internal(format!("failed to query users: {e}")))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoirError::Internal(format!("failed to read users: {e}")))?;
        Ok(users)
    }

    /// Removes the account and, through the foreign key, its sessions.
    pub fn delete_user(&self, username: &str, actor: &str) -> Result<(), StoirError> {
        let user = self.get_user(username)?;
        if user.role == Role::Owner {
            let owners: i64 = self
                .conn
                .query_row(
                    "SELECT COUNT(*) FROM users WHERE role = 'owner'",
                    [],
                    |row| row.get(0),
                )
                .map_err(|e| StoirError::Internal(format!("failed to count owners: {e}")))?;
            if owners <= 1 {
                return Err(StoirError::InvalidArgument(
                    "cannot delete the last owner".into(),
                ));
            }
        }

        self.write(|conn| {
            conn.execute(
                "DELETE FROM users WHERE username = ?1",
                rusqlite::params![username],
            )
            .map_err(|e| StoirError::Internal(format!("failed to delete user: {e}")))?;
            log_activity(conn, actor, "delete", "user", username, None)
        })
    }

    /// Checks the password and opens a session that expires after
    /// `SESSION_TTL_HOURS`.
    pub fn login(&self, username: &str, password: &str) -> Result<Session, StoirError> {
        let stored: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT password_hash, salt FROM users WHERE username = ?1",
                rusqlite::params![username],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| StoirError::Internal(format!("failed to query user: {e}")))?;

        let Some((hash, salt)) = stored else {
            tracing::warn!(username, "login for unknown user");
            return Err(StoirError::Unauthorized);
        };
        if !verify_password(password, &salt, &hash) {
            tracing::warn!(username, "login with wrong password");
            return Err(StoirError::Unauthorized);
        }

        let token = generate_token();
        let expires_at = Utc::now() + Duration::hours(SESSION_TTL_HOURS);
        self.write(|conn| {
            conn.execute(
                "INSERT INTO sessions (token, username, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![token, username, now(), timestamp(expires_at)],
            )
            .map_err(|e| StoirError::Internal(format!("failed to open session: {e}")))?;
            log_activity(conn, username, "login", "user", username, None)
        })?;

        let user = self.get_user(username)?;
        Ok(Session {
            token,
            permissions: user.role.permissions().to_vec(),
            user,
            expires_at,
        })
    }

    /// The user behind a session token. Unknown and expired tokens are
    /// rejected; an expired one is also removed.
    pub fn session_user(&self, token: &str) -> Result<User, StoirError> {
        let found: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT username, expires_at FROM sessions WHERE token = ?1",
                rusqlite::params![token],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| StoirError::Internal(format!("failed to query session: {e}")))?;

        let Some((username, expires_at)) = found else {
            return Err(StoirError::NotLoggedIn);
        };
        if parse_dt(&expires_at)? <= Utc::now() {
            self.conn
                .execute(
                    "DELETE FROM sessions WHERE token = ?1",
                    rusqlite::params![token],
                )
                .map_err(|e| StoirError::Internal(format!("failed to drop session: {e}")))?;
            tracing::debug!(username, "session expired");
            return Err(StoirError::NotLoggedIn);
        }
        self.get_user(&username)
    }

    /// Ends the session behind `token` and returns whose it was.
    pub fn logout(&self, token: &str) -> Result<User, StoirError> {
        let user = self.session_user(token)?;
        self.write(|conn| {
            conn.execute(
                "DELETE FROM sessions WHERE token = ?1",
                rusqlite::params![token],
            )
            .map_err(|e| StoirError::Internal(format!("failed to close session: {e}")))?;
            log_activity(conn, &user.username, "logout", "user", &user.username, None)
        })?;
        Ok(user)
    }
}
