use hype_core::message::now_millis;
use hype_core::{FriendEdge, FriendState, FriendStatus, User, UserId};
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::{DbError, Result};
use crate::users::row_to_user;

impl Database {
    pub fn get_friend_edge(&self, from: UserId, to: UserId) -> Result<Option<FriendEdge>> {
        let status: Option<String> = self
            .conn()
            .query_row(
                "SELECT status FROM friend_edges WHERE from_id = ?1 AND to_id = ?2",
                params![from.0, to.0],
                |row| row.get(0),
            )
            .optional()?;

        status
            .map(|s| {
                s.parse::<FriendStatus>()
                    .map(|status| FriendEdge::new(from, to, status))
                    .map_err(|e| DbError::Corrupt(e.to_string()))
            })
            .transpose()
    }

    /// Insert or update every edge in one transaction.
    pub fn upsert_friend_edges(&mut self, edges: &[FriendEdge]) -> Result<()> {
        let now = now_millis() as i64;
        let tx = self.conn_mut().transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO friend_edges (from_id, to_id, status, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (from_id, to_id)
                 DO UPDATE SET status = excluded.status, updated_at = excluded.updated_at",
            )?;
            for edge in edges {
                stmt.execute(params![edge.from.0, edge.to.0, edge.status.as_str(), now])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn delete_friend_edge(&self, from: UserId, to: UserId, status: FriendStatus) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM friend_edges WHERE from_id = ?1 AND to_id = ?2 AND status = ?3",
            params![from.0, to.0, status.as_str()],
        )?;
        Ok(affected > 0)
    }

    pub fn get_friend_state(&self, user: UserId) -> Result<FriendState> {
        Ok(FriendState {
            friends: self.users_where(
                "SELECT u.id, u.name FROM friend_edges e
                 JOIN users u ON u.id = e.to_id
                 WHERE e.from_id = ?1 AND e.status = 'accepted'
                 ORDER BY u.name",
                user,
            )?,
            pending_incoming: self.users_where(
                "SELECT u.id, u.name FROM friend_edges e
                 JOIN users u ON u.id = e.from_id
                 WHERE e.to_id = ?1 AND e.status = 'pending'
                 ORDER BY u.name",
                user,
            )?,
        })
    }

    fn users_where(&self, sql: &str, user: UserId) -> Result<Vec<User>> {
        let mut stmt = self.conn().prepare(sql)?;
        let rows = stmt.query_map(params![user.0], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hype_core::StoreError;

    #[test]
    fn upsert_and_state() {
        let mut db = Database::open_in_memory().unwrap();
        let alice = db.insert_user("alice", "a").unwrap();
        let bob = db.insert_user("bob", "b").unwrap();
        let carol = db.insert_user("carol", "c").unwrap();

        db.upsert_friend_edges(&[FriendEdge::new(bob.id, alice.id, FriendStatus::Pending)])
            .unwrap();
        db.upsert_friend_edges(&[FriendEdge::new(carol.id, alice.id, FriendStatus::Pending)])
            .unwrap();

        let state = db.get_friend_state(alice.id).unwrap();
        assert!(state.friends.is_empty());
        assert_eq!(state.pending_incoming, vec![bob.clone(), carol.clone()]);

        db.upsert_friend_edges(&[
            FriendEdge::new(bob.id, alice.id, FriendStatus::Accepted),
            FriendEdge::new(alice.id, bob.id, FriendStatus::Accepted),
        ])
        .unwrap();

        let state = db.get_friend_state(alice.id).unwrap();
        assert_eq!(state.friends, vec![bob.clone()]);
        assert_eq!(state.pending_incoming, vec![carol]);
        assert_eq!(db.get_friend_state(bob.id).unwrap().friends, vec![alice.clone()]);
        assert_eq!(
            db.get_friend_edge(alice.id, bob.id).unwrap(),
            Some(FriendEdge::new(alice.id, bob.id, FriendStatus::Accepted))
        );
    }

    #[test]
    fn delete_only_matching_status() {
        let mut db = Database::open_in_memory().unwrap();
        let alice = db.insert_user("alice", "a").unwrap();
        let bob = db.insert_user("bob", "b").unwrap();

        db.upsert_friend_edges(&[FriendEdge::new(alice.id, bob.id, FriendStatus::Accepted)])
            .unwrap();
        assert!(!db
            .delete_friend_edge(alice.id, bob.id, FriendStatus::Pending)
            .unwrap());
        assert!(db
            .delete_friend_edge(alice.id, bob.id, FriendStatus::Accepted)
            .unwrap());
        assert_eq!(db.get_friend_edge(alice.id, bob.id).unwrap(), None);
    }

    #[test]
    fn upsert_is_atomic() {
        let mut db = Database::open_in_memory().unwrap();
        let alice = db.insert_user("alice", "a").unwrap();
        let bob = db.insert_user("bob", "b").unwrap();

        let err = db
            .upsert_friend_edges(&[
                FriendEdge::new(alice.id, bob.id, FriendStatus::Accepted),
                FriendEdge::new(alice.id, UserId(99), FriendStatus::Accepted),
            ])
            .unwrap_err();
        assert!(matches!(StoreError::from(err), StoreError::NotFound));
        assert_eq!(db.get_friend_edge(alice.id, bob.id).unwrap(), None);
    }
}
