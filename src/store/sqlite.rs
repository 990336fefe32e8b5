use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use rusqlite_migration::{Migrations, M};

use crate::app::{PostdeckError, Result};
use crate::domain::{format_timestamp, parse_timestamp, Post, SortField, SortOrder};
use crate::preferences::Preferences;
use crate::store::{
    DocumentFilter, DocumentKey, DocumentQuery, DocumentStore, PreferencesStore, MAX_BATCH_WRITES,
};

const POST_COLUMNS: &str = "id, title, content, user_id, author_name, created_at";
const KEY_COLUMNS: &str = "id, user_id, title, created_at";

/// SQLite-backed document store.
///
/// Query shapes follow hosted document database rules: an owner equality
/// filter may only be combined with an ordering that has a declared
/// composite index. `(userId, createdAt)` is declared by default.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    owner_indexes: HashSet<SortField>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
            owner_indexes: HashSet::from([SortField::Date]),
        };
        store.run_migrations()?;
        Ok(store)
    }

    /// Declare the composite index `(userId, field)`.
    pub fn with_owner_index(mut self, field: SortField) -> Self {
        self.owner_indexes.insert(field);
        self
    }

    fn run_migrations(&self) -> Result<()> {
        let migrations = Migrations::new(vec![M::up(include_str!(
            "../../migrations/001-initial/up.sql"
        ))]);

        let mut conn = self.conn()?;
        migrations
            .to_latest(&mut conn)
            .map_err(|e| PostdeckError::Other(format!("migration failed: {}", e)))?;

        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| {
            PostdeckError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(1),
                Some(e.to_string()),
            ))
        })
    }

    fn column(field: SortField) -> &'static str {
        match field {
            SortField::Date => "created_at",
            SortField::Title => "title",
        }
    }

    fn check_shape(&self, query: &DocumentQuery) -> Result<()> {
        if query.filter.title_prefix.is_some() && query.order_by != SortField::Title {
            return Err(PostdeckError::InvalidQuery(
                "a title prefix range must be ordered by title".into(),
            ));
        }
        if let Some(cursor) = &query.start_after {
            if cursor.field != query.order_by {
                return Err(PostdeckError::InvalidQuery(format!(
                    "cursor on {} cannot continue an ordering by {}",
                    cursor.field, query.order_by
                )));
            }
        }
        if query.filter.owner.is_some() && !self.owner_indexes.contains(&query.order_by) {
            return Err(PostdeckError::IndexRequired(format!(
                "(userId, {})",
                query.order_by
            )));
        }
        Ok(())
    }

    fn where_clause(filter: &DocumentFilter, clauses: &mut Vec<String>, args: &mut Vec<Value>) {
        if let Some(owner) = &filter.owner {
            clauses.push("user_id = ?".into());
            args.push(Value::Text(owner.clone()));
        }
        if let Some((low, high)) = filter.prefix_bounds() {
            clauses.push("title >= ? AND title < ?".into());
            args.push(Value::Text(low));
            args.push(Value::Text(high));
        }
    }

    fn build_select(columns: &str, query: &DocumentQuery) -> (String, Vec<Value>) {
        let column = Self::column(query.order_by);
        let mut clauses = Vec::new();
        let mut args = Vec::new();

        Self::where_clause(&query.filter, &mut clauses, &mut args);

        if let Some(cursor) = &query.start_after {
            let op = match query.direction {
                SortOrder::Asc => ">",
                SortOrder::Desc => "<",
            };
            clauses.push(format!(
                "({col} {op} ? OR ({col} = ? AND id {op} ?))",
                col = column,
                op = op
            ));
            args.push(Value::Text(cursor.key.clone()));
            args.push(Value::Text(cursor.key.clone()));
            args.push(Value::Text(cursor.id.clone()));
        }

        let mut sql = format!("SELECT {} FROM posts", columns);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        let dir = query.direction.as_sql();
        sql.push_str(&format!(" ORDER BY {} {}, id {} LIMIT ?", column, dir, dir));
        args.push(Value::Integer(query.limit as i64));

        (sql, args)
    }

    fn row_to_post(row: &Row<'_>) -> rusqlite::Result<Post> {
        Ok(Post {
            id: row.get(0)?,
            title: row.get(1)?,
            content: row.get(2)?,
            user_id: row.get(3)?,
            author_name: row.get(4)?,
            created_at: row
                .get::<_, String>(5)
                .ok()
                .and_then(|s| parse_timestamp(&s))
                .unwrap_or_else(Utc::now),
            is_external: false,
        })
    }

    fn row_to_key(row: &Row<'_>) -> rusqlite::Result<DocumentKey> {
        Ok(DocumentKey {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            created_at: row
                .get::<_, String>(3)
                .ok()
                .and_then(|s| parse_timestamp(&s))
                .unwrap_or_else(Utc::now),
        })
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn query(&self, query: &DocumentQuery) -> Result<Vec<Post>> {
        self.check_shape(query)?;
        let (sql, args) = Self::build_select(POST_COLUMNS, query);

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let posts = stmt
            .query_map(params_from_iter(args), Self::row_to_post)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(posts)
    }

    async fn query_keys(&self, query: &DocumentQuery) -> Result<Vec<DocumentKey>> {
        self.check_shape(query)?;
        let (sql, args) = Self::build_select(KEY_COLUMNS, query);

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let keys = stmt
            .query_map(params_from_iter(args), Self::row_to_key)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(keys)
    }

    async fn count(&self, filter: &DocumentFilter) -> Result<u64> {
        let mut clauses = Vec::new();
        let mut args = Vec::new();
        Self::where_clause(filter, &mut clauses, &mut args);

        let mut sql = String::from("SELECT COUNT(*) FROM posts");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        let conn = self.conn()?;
        let count: i64 = conn.query_row(&sql, params_from_iter(args), |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    async fn get(&self, id: &str) -> Result<Option<Post>> {
        let conn = self.conn()?;
        let post = conn
            .query_row(
                &format!("SELECT {} FROM posts WHERE id = ?1", POST_COLUMNS),
                params![id],
                Self::row_to_post,
            )
            .optional()?;
        Ok(post)
    }

    async fn set(&self, post: &Post) -> Result<()> {
        if post.is_external {
            return Err(PostdeckError::CrossSourceEdit(post.id.clone()));
        }
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO posts (id, title, content, user_id, author_name, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                title = ?2, content = ?3, user_id = ?4, author_name = ?5, created_at = ?6",
            params![
                post.id,
                post.title,
                post.content,
                post.user_id,
                post.author_name,
                format_timestamp(&post.created_at)
            ],
        )?;
        Ok(())
    }

    async fn delete_batch(&self, ids: &[String]) -> Result<()> {
        if ids.len() > MAX_BATCH_WRITES {
            return Err(PostdeckError::InvalidQuery(format!(
                "batch of {} exceeds the {} write limit",
                ids.len(),
                MAX_BATCH_WRITES
            )));
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for id in ids {
            tx.execute("DELETE FROM posts WHERE id = ?1", params![id])?;
        }
        tx.commit()?;
        Ok(())
    }
}

#[async_trait]
impl PreferencesStore for SqliteStore {
    async fn load_preferences(&self, user_id: &str) -> Result<Option<Preferences>> {
        let conn = self.conn()?;
        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT body, updated_at FROM preferences WHERE user_id = ?1",
                params![user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            Some((body, updated_at)) => {
                let mut preferences: Preferences = serde_json::from_str(&body)?;
                preferences.updated_at = Some(updated_at);
                Ok(Some(preferences))
            }
            None => Ok(None),
        }
    }

    async fn save_preferences(&self, user_id: &str, preferences: &Preferences) -> Result<i64> {
        let updated_at = Utc::now().timestamp_millis();
        let conn = self.conn()?;

        let existing: Option<String> = conn
            .query_row(
                "SELECT body FROM preferences WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;

        let mut merged = match existing {
            Some(body) => serde_json::from_str::<serde_json::Value>(&body)?,
            None => serde_json::Value::Object(Default::default()),
        };
        if let (Some(target), serde_json::Value::Object(incoming)) =
            (merged.as_object_mut(), serde_json::to_value(preferences)?)
        {
            for (key, value) in incoming {
                target.insert(key, value);
            }
            target.insert("updatedAt".into(), serde_json::Value::from(updated_at));
        }

        conn.execute(
            "INSERT INTO preferences (user_id, body, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET body = ?2, updated_at = ?3",
            params![user_id, serde_json::to_string(&merged)?, updated_at],
        )?;

        Ok(updated_at)
    }
}
