use hype_core::message::now_millis;
use hype_core::{User, UserId};
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::Result;

impl Database {
    pub fn insert_user(&self, name: &str, token: &str) -> Result<User> {
        self.conn().execute(
            "INSERT INTO users (name, token, created_at) VALUES (?1, ?2, ?3)",
            params![name, token, now_millis() as i64],
        )?;
        Ok(User::new(self.conn().last_insert_rowid(), name))
    }

    pub fn get_user_by_name(&self, name: &str) -> Result<Option<User>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT id, name FROM users WHERE name = ?1",
                params![name],
                row_to_user,
            )
            .optional()?)
    }

    pub fn get_user_by_id(&self, id: UserId) -> Result<Option<User>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT id, name FROM users WHERE id = ?1",
                params![id.0],
                row_to_user,
            )
            .optional()?)
    }

    pub fn get_user_by_token(&self, name: &str, token: &str) -> Result<Option<User>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT id, name FROM users WHERE name = ?1 AND token = ?2",
                params![name, token],
                row_to_user,
            )
            .optional()?)
    }
}

pub(crate) fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id: i64 = row.get(0)?;
    let name: String = row.get(1)?;
    Ok(User::new(id, name))
}
