use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::Quote;

#[derive(Debug, Deserialize)]
pub struct CreateQuoteRequest {
    pub text: String,
    #[serde(default)]
    pub author: Option<String>,
    pub group_id: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateQuoteRequest {
    pub text: String,
    #[serde(default)]
    pub author: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub author: Option<String>,
    pub group_id: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct QuoteResponse {
    pub id: Uuid,
    pub text: String,
    pub author: Option<String>,
    pub uploader_id: Uuid,
    pub group_id: String,
    pub uploader: String, // username, "Unknown" if unresolved
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl QuoteResponse {
    pub fn new(quote: Quote, uploader: String) -> Self {
        Self {
            id: quote.id,
            text: quote.text,
            author: quote.author,
            uploader_id: quote.uploader_id,
            group_id: quote.group_key,
            uploader,
            created_at: quote.created_at,
            updated_at: quote.updated_at,
        }
    }
}
