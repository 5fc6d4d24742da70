use async_trait::async_trait;
use sqlx::{SqliteConnection, SqlitePool};
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    groups::repo_types::MembershipRow,
    storage::GroupStore,
};

// Groups are stored as one `groups` entity plus a `memberships` join table;
// callers see the join as membership rows.
const ROW_SELECT: &str = r#"
    SELECT m.id AS id, g.group_key AS group_key, g.name AS name, m.member_id AS member_id,
           m.created_at AS created_at, m.updated_at AS updated_at
    FROM memberships m
    JOIN quote_groups g ON g.id = m.group_id
"#;

#[derive(Clone)]
pub struct SqliteGroupStore {
    db: SqlitePool,
}

impl SqliteGroupStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

async fn find_group_id(conn: &mut SqliteConnection, group_key: &str) -> AppResult<Option<Uuid>> {
    let id = sqlx::query_scalar::<_, Uuid>("SELECT id FROM quote_groups WHERE group_key = ?1")
        .bind(group_key)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(id)
}

async fn group_of_membership(conn: &mut SqliteConnection, id: Uuid) -> AppResult<Uuid> {
    sqlx::query_scalar::<_, Uuid>("SELECT group_id FROM memberships WHERE id = ?1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::not_found("Group not found"))
}

async fn insert_group(
    conn: &mut SqliteConnection,
    group_key: &str,
    name: &str,
    now: OffsetDateTime,
) -> AppResult<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO quote_groups (id, group_key, name, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?4)
        "#,
    )
    .bind(id)
    .bind(group_key)
    .bind(name)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(|e| match AppError::from(e) {
        AppError::AlreadyExists(_) => AppError::AlreadyExists("Group already exists".into()),
        other => other,
    })?;
    Ok(id)
}

async fn insert_membership(
    conn: &mut SqliteConnection,
    group_id: Uuid,
    member_id: Uuid,
    now: OffsetDateTime,
) -> AppResult<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO memberships (id, group_id, member_id, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?4)
        "#,
    )
    .bind(id)
    .bind(group_id)
    .bind(member_id)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        if e.as_database_error()
            .map(|db| db.is_foreign_key_violation())
            .unwrap_or(false)
        {
            return AppError::not_found("Member not found");
        }
        match AppError::from(e) {
            AppError::AlreadyExists(_) => {
                AppError::AlreadyExists("Member already belongs to this group".into())
            }
            other => other,
        }
    })?;
    Ok(id)
}

async fn touch_group(
    conn: &mut SqliteConnection,
    group_id: Uuid,
    name: &str,
    now: OffsetDateTime,
) -> AppResult<()> {
    sqlx::query("UPDATE quote_groups SET name = ?1, updated_at = ?2 WHERE id = ?3")
        .bind(name)
        .bind(now)
        .bind(group_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("UPDATE memberships SET updated_at = ?1 WHERE group_id = ?2")
        .bind(now)
        .bind(group_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn rows_where(
    conn: &mut SqliteConnection,
    clause: &str,
    bind: impl for<'q> sqlx::Encode<'q, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite> + Send,
) -> AppResult<Vec<MembershipRow>> {
    let sql = format!("{ROW_SELECT} WHERE {clause} ORDER BY m.created_at DESC, m.rowid DESC");
    let rows = sqlx::query_as::<_, MembershipRow>(&sql)
        .bind(bind)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows)
}

/// Quotes never outlive their group; a later group reusing the key starts empty.
async fn delete_quotes(conn: &mut SqliteConnection, group_key: &str) -> AppResult<u64> {
    let result = sqlx::query("DELETE FROM quotes WHERE group_key = ?1")
        .bind(group_key)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

fn non_empty(rows: Vec<MembershipRow>, msg: &str) -> AppResult<Vec<MembershipRow>> {
    if rows.is_empty() {
        return Err(AppError::not_found(msg));
    }
    Ok(rows)
}

#[async_trait]
impl GroupStore for SqliteGroupStore {
    async fn create_membership(
        &self,
        group_key: &str,
        name: &str,
        member_id: Uuid,
    ) -> AppResult<MembershipRow> {
        let now = OffsetDateTime::now_utc();
        let mut tx = self.db.begin().await?;
        let group_id = match find_group_id(&mut tx, group_key).await? {
            Some(id) => id,
            None => insert_group(&mut tx, group_key, name, now).await?,
        };
        let id = insert_membership(&mut tx, group_id, member_id, now).await?;
        tx.commit().await?;

        debug!(group_key, %member_id, "membership created");
        self.get_membership(id).await
    }

    async fn get_membership(&self, id: Uuid) -> AppResult<MembershipRow> {
        let mut conn = self.db.acquire().await?;
        rows_where(&mut conn, "m.id = ?1", id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::not_found("Group not found"))
    }

    async fn list_by_group_key(&self, group_key: &str) -> AppResult<Vec<MembershipRow>> {
        let mut conn = self.db.acquire().await?;
        let rows = rows_where(&mut conn, "g.group_key = ?1", group_key.to_string()).await?;
        non_empty(rows, "Group not found")
    }

    async fn list_by_member(&self, member_id: Uuid) -> AppResult<Vec<MembershipRow>> {
        let mut conn = self.db.acquire().await?;
        let rows = rows_where(&mut conn, "m.member_id = ?1", member_id).await?;
        non_empty(rows, "No groups found for member")
    }

    async fn update_name(&self, row: &MembershipRow) -> AppResult<MembershipRow> {
        let now = OffsetDateTime::now_utc();
        let mut tx = self.db.begin().await?;
        let group_id = group_of_membership(&mut tx, row.id).await?;
        touch_group(&mut tx, group_id, &row.name, now).await?;
        tx.commit().await?;
        self.get_membership(row.id).await
    }

    async fn delete_membership(&self, id: Uuid) -> AppResult<()> {
        let mut tx = self.db.begin().await?;
        let group_id = group_of_membership(&mut tx, id).await?;
        sqlx::query("DELETE FROM memberships WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        // The last member leaving takes the group entity and its quotes with it.
        let emptied = sqlx::query_scalar::<_, String>(
            r#"
            DELETE FROM quote_groups
            WHERE id = ?1 AND NOT EXISTS (SELECT 1 FROM memberships WHERE group_id = ?1)
            RETURNING group_key
            "#,
        )
        .bind(group_id)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(group_key) = emptied {
            let quotes = delete_quotes(&mut tx, &group_key).await?;
            debug!(group_key = %group_key, quotes, "last member left, group removed");
        }
        tx.commit().await?;
        Ok(())
    }

    async fn create_group(
        &self,
        group_key: &str,
        name: &str,
        members: &[Uuid],
    ) -> AppResult<Vec<MembershipRow>> {
        if members.is_empty() {
            return Err(AppError::invalid_input("A group needs at least one member"));
        }
        let now = OffsetDateTime::now_utc();
        let mut tx = self.db.begin().await?;
        if find_group_id(&mut tx, group_key).await?.is_some() {
            return Err(AppError::AlreadyExists("Group already exists".into()));
        }
        let group_id = insert_group(&mut tx, group_key, name, now).await?;
        for member_id in members {
            insert_membership(&mut tx, group_id, *member_id, now).await?;
        }
        let rows = rows_where(&mut tx, "g.group_key = ?1", group_key.to_string()).await?;
        tx.commit().await?;

        debug!(group_key, members = rows.len(), "group created");
        Ok(rows)
    }

    async fn update_group(
        &self,
        group_key: &str,
        name: &str,
        members: &[Uuid],
    ) -> AppResult<Vec<MembershipRow>> {
        if members.is_empty() {
            return Err(AppError::invalid_input("A group needs at least one member"));
        }
        let now = OffsetDateTime::now_utc();
        let mut tx = self.db.begin().await?;
        let group_id = find_group_id(&mut tx, group_key)
            .await?
            .ok_or_else(|| AppError::not_found("Group not found"))?;

        let current = sqlx::query_scalar::<_, Uuid>(
            "SELECT member_id FROM memberships WHERE group_id = ?1",
        )
        .bind(group_id)
        .fetch_all(&mut *tx)
        .await?;

        for gone in current.iter().filter(|id| !members.contains(*id)) {
            sqlx::query("DELETE FROM memberships WHERE group_id = ?1 AND member_id = ?2")
                .bind(group_id)
                .bind(*gone)
                .execute(&mut *tx)
                .await?;
        }
        for added in members.iter().filter(|id| !current.contains(*id)) {
            insert_membership(&mut tx, group_id, *added, now).await?;
        }
        touch_group(&mut tx, group_id, name, now).await?;

        let rows = rows_where(&mut tx, "g.group_key = ?1", group_key.to_string()).await?;
        tx.commit().await?;

        debug!(group_key, members = rows.len(), "group updated");
        Ok(rows)
    }

    async fn delete_group(&self, group_key: &str) -> AppResult<u64> {
        let mut tx = self.db.begin().await?;
        let group_id = find_group_id(&mut tx, group_key)
            .await?
            .ok_or_else(|| AppError::not_found("Group not found"))?;
        let removed = sqlx::query("DELETE FROM memberships WHERE group_id = ?1")
            .bind(group_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM quote_groups WHERE id = ?1")
            .bind(group_id)
            .execute(&mut *tx)
            .await?;
        let quotes = delete_quotes(&mut tx, group_key).await?;
        tx.commit().await?;

        debug!(group_key, removed, quotes, "group deleted");
        Ok(removed)
    }
}
