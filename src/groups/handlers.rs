use axum::{
    extract::{Path, State},
    response::Response,
    routing::{get, patch},
    Router,
};
use tracing::instrument;

use crate::{
    api::{self, JsonBody},
    auth::{extractors::AuthUser, services::display_name},
    error::{AppError, AppResult},
    groups::{
        dto::{CreateGroupRequest, GroupResponse, UpdateGroupRequest},
        repo_types::MembershipRow,
        services::Groups,
    },
    state::AppState,
    storage::UserStore,
};

pub fn group_routes() -> Router<AppState> {
    Router::new()
        .route("/groups", get(list_groups).post(create_group))
        .route("/groups/:id", patch(update_group).delete(delete_group))
}

async fn respond(users: &dyn UserStore, rows: Vec<MembershipRow>) -> AppResult<GroupResponse> {
    let first = rows
        .first()
        .cloned()
        .ok_or_else(|| AppError::not_found("Group not found"))?;

    let mut members = Vec::with_capacity(rows.len());
    let mut member_ids = Vec::with_capacity(rows.len());
    for row in &rows {
        members.push(display_name(users, row.member_id).await);
        member_ids.push(row.member_id);
    }

    Ok(GroupResponse {
        id: first.id,
        group_id: first.group_key,
        name: first.name,
        members,
        member_ids,
        created_at: first.created_at,
        updated_at: first.updated_at,
    })
}

fn groups(state: &AppState) -> Groups<'_> {
    Groups::new(state.store.as_ref(), state.config.group_write_mode)
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn create_group(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    JsonBody(payload): JsonBody<CreateGroupRequest>,
) -> AppResult<Response> {
    let name = api::required(&payload.name, "name")?;
    let group_key = api::required(&payload.group_id, "group_id")?;

    let rows = groups(&state)
        .create(&user, &group_key, &name, &payload.members)
        .await?;
    Ok(api::created(respond(state.store.users(), rows).await?))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn list_groups(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> AppResult<Response> {
    let all = groups(&state).list(&user).await?;
    let mut items = Vec::with_capacity(all.len());
    for rows in all {
        items.push(respond(state.store.users(), rows).await?);
    }
    Ok(api::ok(items))
}

#[instrument(skip_all, fields(user_id = %user.id, group_key = %group_key))]
pub async fn update_group(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(group_key): Path<String>,
    JsonBody(payload): JsonBody<UpdateGroupRequest>,
) -> AppResult<Response> {
    let name = api::required(&payload.name, "name")?;

    let rows = groups(&state)
        .update(&user, &group_key, &name, payload.members.as_deref())
        .await?;
    Ok(api::ok(respond(state.store.users(), rows).await?))
}

#[instrument(skip_all, fields(user_id = %user.id, group_key = %group_key))]
pub async fn delete_group(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(group_key): Path<String>,
) -> AppResult<Response> {
    groups(&state).delete(&user, &group_key).await?;
    Ok(api::no_content())
}
