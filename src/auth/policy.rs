use tracing::warn;

use crate::{
    auth::repo_types::User,
    error::{AppError, AppResult},
    groups::repo_types::MembershipRow,
    quotes::repo_types::Quote,
    storage::GroupStore,
};

/// Loads the group's rows and checks that `user` is one of its members.
/// Unknown keys are `NotFound`, non-members are `Forbidden`.
pub async fn require_member(
    groups: &dyn GroupStore,
    user: &User,
    group_key: &str,
) -> AppResult<Vec<MembershipRow>> {
    let rows = groups.list_by_group_key(group_key).await?;
    if !rows.iter().any(|row| row.member_id == user.id) {
        warn!(user_id = %user.id, group_key, "access to foreign group refused");
        return Err(AppError::forbidden("Not a member of this group"));
    }
    Ok(rows)
}

/// Only the uploader may change or remove a quote.
pub fn require_owner(user: &User, quote: &Quote) -> AppResult<()> {
    if quote.uploader_id != user.id {
        warn!(user_id = %user.id, quote_id = %quote.id, "quote mutation by non-owner refused");
        return Err(AppError::forbidden("Not allowed to modify this quote"));
    }
    Ok(())
}
