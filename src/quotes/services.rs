use tracing::info;
use uuid::Uuid;

use crate::{
    auth::{
        policy::{require_member, require_owner},
        repo_types::User,
    },
    error::{AppError, AppResult},
    quotes::repo_types::{NewQuote, Quote, QuoteFilter, QuoteScope},
    storage::Store,
};

/// Paging and filtering as received from the client, before clamping.
#[derive(Debug, Default, Clone)]
pub struct QuoteQuery {
    pub author: Option<String>,
    pub group_key: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// Quote operations with membership and ownership checks applied.
pub struct Quotes<'a> {
    store: &'a dyn Store,
}

impl<'a> Quotes<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }

    pub async fn create(
        &self,
        actor: &User,
        text: String,
        author: Option<String>,
        group_key: String,
    ) -> AppResult<Quote> {
        require_member(self.store.groups(), actor, &group_key).await?;

        let quote = self
            .store
            .quotes()
            .create(NewQuote {
                text,
                author,
                uploader_id: actor.id,
                group_key,
            })
            .await?;

        info!(quote_id = %quote.id, user_id = %actor.id, group_key = %quote.group_key, "quote created");
        Ok(quote)
    }

    /// A quote is visible to members of its group only.
    pub async fn get(&self, actor: &User, id: Uuid) -> AppResult<Quote> {
        let quote = self.store.quotes().get_by_id(id).await?;
        require_member(self.store.groups(), actor, &quote.group_key)
            .await
            .map_err(|e| match e {
                AppError::NotFound(_) => AppError::not_found("Quote not found"),
                other => other,
            })?;
        Ok(quote)
    }

    pub async fn list(&self, actor: &User, query: QuoteQuery) -> AppResult<Vec<Quote>> {
        let filter = self.filter(actor, query).await?;
        self.store.quotes().list(&filter).await
    }

    pub async fn random(&self, actor: &User, query: QuoteQuery) -> AppResult<Quote> {
        let filter = self.filter(actor, query).await?;
        self.store.quotes().get_random(&filter).await
    }

    /// `author: None` keeps the current attribution, `Some("")` clears it.
    pub async fn update(
        &self,
        actor: &User,
        id: Uuid,
        text: String,
        author: Option<String>,
    ) -> AppResult<Quote> {
        let mut quote = self.store.quotes().get_by_id(id).await?;
        require_owner(actor, &quote)?;

        quote.text = text;
        if let Some(author) = author {
            let author = author.trim().to_string();
            quote.author = (!author.is_empty()).then_some(author);
        }
        let updated = self.store.quotes().update(&quote).await?;

        info!(quote_id = %id, user_id = %actor.id, "quote updated");
        Ok(updated)
    }

    pub async fn delete(&self, actor: &User, id: Uuid) -> AppResult<()> {
        let quote = self.store.quotes().get_by_id(id).await?;
        require_owner(actor, &quote)?;
        self.store.quotes().delete(id).await?;

        info!(quote_id = %id, user_id = %actor.id, "quote deleted");
        Ok(())
    }

    async fn filter(&self, actor: &User, query: QuoteQuery) -> AppResult<QuoteFilter> {
        let scope = match query.group_key {
            Some(key) => {
                require_member(self.store.groups(), actor, &key).await?;
                QuoteScope::Group(key)
            }
            None => QuoteScope::MemberOf(actor.id),
        };
        Ok(QuoteFilter::new(query.author, scope, query.page, query.limit))
    }
}
