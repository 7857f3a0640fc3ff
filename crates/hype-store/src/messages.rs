use hype_core::{Message, User, UserId};
use rusqlite::params;

use crate::database::Database;
use crate::error::Result;

impl Database {
    pub fn insert_message(&self, from: &User, to: &User, body: &str, sent_at: u64) -> Result<Message> {
        self.conn().execute(
            "INSERT INTO messages (sender_id, recipient_id, body, sent_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![from.id.0, to.id.0, body, sent_at as i64],
        )?;

        Ok(Message {
            id: self.conn().last_insert_rowid(),
            from: from.clone(),
            to: to.clone(),
            body: body.to_string(),
            sent_at,
        })
    }

    /// The most recent `limit` messages between `a` and `b`, oldest first.
    pub fn get_conversation(&self, a: UserId, b: UserId, limit: u32) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(
            "SELECT m.id, s.id, s.name, r.id, r.name, m.body, m.sent_at
             FROM messages m
             JOIN users s ON s.id = m.sender_id
             JOIN users r ON r.id = m.recipient_id
             WHERE (m.sender_id = ?1 AND m.recipient_id = ?2)
                OR (m.sender_id = ?2 AND m.recipient_id = ?1)
             ORDER BY m.sent_at DESC, m.id DESC
             LIMIT ?3",
        )?;

        let rows = stmt.query_map(params![a.0, b.0, limit], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        messages.reverse();
        Ok(messages)
    }

    pub fn count_messages(&self) -> Result<u64> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let sent_at: i64 = row.get(6)?;
    Ok(Message {
        id: row.get(0)?,
        from: User::new(row.get(1)?, row.get::<_, String>(2)?),
        to: User::new(row.get(3)?, row.get::<_, String>(4)?),
        body: row.get(5)?,
        sent_at: sent_at as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_is_symmetric_and_ordered() {
        let db = Database::open_in_memory().unwrap();
        let alice = db.insert_user("alice", "a").unwrap();
        let bob = db.insert_user("bob", "b").unwrap();
        let carol = db.insert_user("carol", "c").unwrap();

        db.insert_message(&alice, &bob, "one", 10).unwrap();
        db.insert_message(&bob, &alice, "two", 20).unwrap();
        db.insert_message(&alice, &carol, "other", 25).unwrap();
        db.insert_message(&alice, &bob, "three", 30).unwrap();

        let bodies = |msgs: Vec<Message>| msgs.into_iter().map(|m| m.body).collect::<Vec<_>>();
        assert_eq!(
            bodies(db.get_conversation(alice.id, bob.id, 10).unwrap()),
            vec!["one", "two", "three"]
        );
        assert_eq!(
            bodies(db.get_conversation(bob.id, alice.id, 2).unwrap()),
            vec!["two", "three"]
        );
        assert_eq!(db.count_messages().unwrap(), 4);
    }

    #[test]
    fn same_timestamp_keeps_insert_order() {
        let db = Database::open_in_memory().unwrap();
        let alice = db.insert_user("alice", "a").unwrap();
        let bob = db.insert_user("bob", "b").unwrap();

        for body in ["a", "b", "c"] {
            db.insert_message(&alice, &bob, body, 5).unwrap();
        }

        let messages = db.get_conversation(alice.id, bob.id, 10).unwrap();
        assert_eq!(
            messages.iter().map(|m| m.body.as_str()).collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );
        assert_eq!(messages[0].from, alice);
        assert_eq!(messages[0].to, bob);
    }

    #[test]
    fn message_to_unknown_user_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let alice = db.insert_user("alice", "a").unwrap();
        let ghost = User::new(99, "ghost");

        assert!(db.insert_message(&alice, &ghost, "hi", 1).is_err());
    }
}
