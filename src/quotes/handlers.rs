use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    response::Response,
    routing::get,
    Router,
};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    api::{self, JsonBody, QueryParams},
    auth::{extractors::AuthUser, services::display_name},
    error::AppResult,
    quotes::{
        dto::{CreateQuoteRequest, ListQuery, QuoteResponse, UpdateQuoteRequest},
        repo_types::Quote,
        services::{QuoteQuery, Quotes},
    },
    state::AppState,
    storage::UserStore,
};

pub fn quote_routes() -> Router<AppState> {
    Router::new()
        .route("/quotes", get(list_quotes).post(create_quote))
        .route("/quotes/random", get(random_quote))
        .route(
            "/quotes/:id",
            get(get_quote).patch(update_quote).delete(delete_quote),
        )
}

async fn respond(users: &dyn UserStore, quote: Quote) -> QuoteResponse {
    let uploader = display_name(users, quote.uploader_id).await;
    QuoteResponse::new(quote, uploader)
}

fn query(q: ListQuery) -> QuoteQuery {
    QuoteQuery {
        author: api::optional(q.author),
        group_key: api::optional(q.group_id),
        page: q.page,
        limit: q.limit,
    }
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn create_quote(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    JsonBody(payload): JsonBody<CreateQuoteRequest>,
) -> AppResult<Response> {
    let text = api::required(&payload.text, "text")?;
    let group_key = api::required(&payload.group_id, "group_id")?;

    let quote = Quotes::new(state.store.as_ref())
        .create(&user, text, api::optional(payload.author), group_key)
        .await?;
    Ok(api::created(respond(state.store.users(), quote).await))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn list_quotes(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    QueryParams(q): QueryParams<ListQuery>,
) -> AppResult<Response> {
    let quotes = Quotes::new(state.store.as_ref())
        .list(&user, query(q))
        .await?;

    let mut names: HashMap<Uuid, String> = HashMap::new();
    let mut items = Vec::with_capacity(quotes.len());
    for quote in quotes {
        let uploader = match names.get(&quote.uploader_id) {
            Some(name) => name.clone(),
            None => {
                let name = display_name(state.store.users(), quote.uploader_id).await;
                names.insert(quote.uploader_id, name.clone());
                name
            }
        };
        items.push(QuoteResponse::new(quote, uploader));
    }
    Ok(api::ok(items))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn random_quote(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    QueryParams(q): QueryParams<ListQuery>,
) -> AppResult<Response> {
    let quote = Quotes::new(state.store.as_ref())
        .random(&user, query(q))
        .await?;
    Ok(api::ok(respond(state.store.users(), quote).await))
}

#[instrument(skip_all, fields(user_id = %user.id, quote_id = %id))]
pub async fn get_quote(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let id = api::parse_id(&id)?;
    let quote = Quotes::new(state.store.as_ref()).get(&user, id).await?;
    Ok(api::ok(respond(state.store.users(), quote).await))
}

#[instrument(skip_all, fields(user_id = %user.id, quote_id = %id))]
pub async fn update_quote(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    JsonBody(payload): JsonBody<UpdateQuoteRequest>,
) -> AppResult<Response> {
    let id = api::parse_id(&id)?;
    let text = api::required(&payload.text, "text")?;

    let quote = Quotes::new(state.store.as_ref())
        .update(&user, id, text, payload.author)
        .await?;
    Ok(api::ok(respond(state.store.users(), quote).await))
}

#[instrument(skip_all, fields(user_id = %user.id, quote_id = %id))]
pub async fn delete_quote(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let id = api::parse_id(&id)?;
    Quotes::new(state.store.as_ref()).delete(&user, id).await?;
    Ok(api::no_content())
}
