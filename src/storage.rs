use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    auth::repo_types::{NewUser, User},
    error::AppResult,
    groups::repo_types::MembershipRow,
    quotes::repo_types::{NewQuote, Quote, QuoteFilter},
};

/// User records. Password hashing happens above this layer.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with `AlreadyExists` when the email is taken.
    async fn insert(&self, user: NewUser) -> AppResult<User>;
    async fn get_by_id(&self, id: Uuid) -> AppResult<User>;
    /// `Ok(None)` when no user has this email.
    async fn get_by_email(&self, email: &str) -> AppResult<Option<User>>;
    /// Rewrites email, username and the authenticated flag.
    async fn update(&self, user: &User) -> AppResult<()>;
}

/// Group membership, addressed as rows keyed by a shared group key.
#[async_trait]
pub trait GroupStore: Send + Sync {
    async fn create_membership(
        &self,
        group_key: &str,
        name: &str,
        member_id: Uuid,
    ) -> AppResult<MembershipRow>;
    async fn get_membership(&self, id: Uuid) -> AppResult<MembershipRow>;
    /// Newest first. `NotFound` when the group has no rows.
    async fn list_by_group_key(&self, group_key: &str) -> AppResult<Vec<MembershipRow>>;
    /// Newest first. `NotFound` when the member belongs to no group.
    async fn list_by_member(&self, member_id: Uuid) -> AppResult<Vec<MembershipRow>>;
    async fn update_name(&self, row: &MembershipRow) -> AppResult<MembershipRow>;
    async fn delete_membership(&self, id: Uuid) -> AppResult<()>;

    // Whole-group writes, each applied as a single unit.
    async fn create_group(
        &self,
        group_key: &str,
        name: &str,
        members: &[Uuid],
    ) -> AppResult<Vec<MembershipRow>>;
    async fn update_group(
        &self,
        group_key: &str,
        name: &str,
        members: &[Uuid],
    ) -> AppResult<Vec<MembershipRow>>;
    /// Returns the number of membership rows removed.
    async fn delete_group(&self, group_key: &str) -> AppResult<u64>;
}

/// Quote records. Ownership checks are the caller's job.
#[async_trait]
pub trait QuoteStore: Send + Sync {
    async fn create(&self, quote: NewQuote) -> AppResult<Quote>;
    async fn get_by_id(&self, id: Uuid) -> AppResult<Quote>;
    async fn get_random(&self, filter: &QuoteFilter) -> AppResult<Quote>;
    async fn list(&self, filter: &QuoteFilter) -> AppResult<Vec<Quote>>;
    async fn update(&self, quote: &Quote) -> AppResult<Quote>;
    async fn delete(&self, id: Uuid) -> AppResult<()>;
}

/// Capability bundle handed to the policy and service layers.
pub trait Store: Send + Sync {
    fn users(&self) -> &dyn UserStore;
    fn groups(&self) -> &dyn GroupStore;
    fn quotes(&self) -> &dyn QuoteStore;
}
