use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    quotes::repo_types::{NewQuote, Quote, QuoteFilter, QuoteScope},
    storage::QuoteStore,
};

const QUOTE_COLUMNS: &str = "id, text, author, uploader_id, group_key, created_at, updated_at";

#[derive(Clone)]
pub struct SqliteQuoteStore {
    db: SqlitePool,
}

impl SqliteQuoteStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

/// `SELECT ... FROM quotes WHERE <scope> [AND author = ?]`
fn filtered<'a>(filter: &'a QuoteFilter) -> QueryBuilder<'a, Sqlite> {
    let mut qb = QueryBuilder::new(format!("SELECT {QUOTE_COLUMNS} FROM quotes WHERE "));
    match &filter.scope {
        QuoteScope::Group(key) => {
            qb.push("group_key = ").push_bind(key.as_str());
        }
        QuoteScope::MemberOf(user_id) => {
            qb.push(
                "group_key IN (SELECT g.group_key FROM quote_groups g \
                 JOIN memberships m ON m.group_id = g.id WHERE m.member_id = ",
            )
            .push_bind(*user_id)
            .push(")");
        }
    }
    if let Some(author) = &filter.author {
        qb.push(" AND author = ").push_bind(author.as_str());
    }
    qb
}

#[async_trait]
impl QuoteStore for SqliteQuoteStore {
    async fn create(&self, quote: NewQuote) -> AppResult<Quote> {
        let now = OffsetDateTime::now_utc();
        let created = sqlx::query_as::<_, Quote>(&format!(
            r#"
            INSERT INTO quotes (id, text, author, uploader_id, group_key, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
            RETURNING {QUOTE_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&quote.text)
        .bind(&quote.author)
        .bind(quote.uploader_id)
        .bind(&quote.group_key)
        .bind(now)
        .fetch_one(&self.db)
        .await?;
        Ok(created)
    }

    async fn get_by_id(&self, id: Uuid) -> AppResult<Quote> {
        sqlx::query_as::<_, Quote>(&format!("SELECT {QUOTE_COLUMNS} FROM quotes WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AppError::not_found("Quote not found"))
    }

    async fn get_random(&self, filter: &QuoteFilter) -> AppResult<Quote> {
        let mut qb = filtered(filter);
        qb.push(" ORDER BY RANDOM() LIMIT 1");
        qb.build_query_as::<Quote>()
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AppError::not_found("No quotes found"))
    }

    async fn list(&self, filter: &QuoteFilter) -> AppResult<Vec<Quote>> {
        let mut qb = filtered(filter);
        qb.push(" ORDER BY created_at DESC, rowid DESC LIMIT ")
            .push_bind(filter.limit)
            .push(" OFFSET ")
            .push_bind(filter.offset());
        let rows = qb.build_query_as::<Quote>().fetch_all(&self.db).await?;
        Ok(rows)
    }

    async fn update(&self, quote: &Quote) -> AppResult<Quote> {
        sqlx::query_as::<_, Quote>(&format!(
            r#"
            UPDATE quotes
            SET text = ?1, author = ?2, updated_at = ?3
            WHERE id = ?4
            RETURNING {QUOTE_COLUMNS}
            "#
        ))
        .bind(&quote.text)
        .bind(&quote.author)
        .bind(OffsetDateTime::now_utc())
        .bind(quote.id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::not_found("Quote not found"))
    }

    async fn delete(&self, id: Uuid) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM quotes WHERE id = ?1")
            .bind(id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found("Quote not found"));
        }
        Ok(())
    }
}
