use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    auth::{policy::require_member, repo_types::User},
    config::GroupWriteMode,
    error::{AppError, AppResult},
    groups::repo_types::MembershipRow,
    storage::Store,
};

/// Group operations on top of the row-level store. In
/// [`GroupWriteMode::Atomic`] every write is one transaction; in
/// [`GroupWriteMode::BestEffort`] writes go row by row and stop at the first
/// failure, leaving earlier rows in place.
pub struct Groups<'a> {
    store: &'a dyn Store,
    mode: GroupWriteMode,
}

impl<'a> Groups<'a> {
    pub fn new(store: &'a dyn Store, mode: GroupWriteMode) -> Self {
        Self { store, mode }
    }

    /// Collapses duplicates, checks every member, then adds `actor` if absent.
    async fn resolve_members(&self, actor: &User, requested: &[Uuid]) -> AppResult<Vec<Uuid>> {
        let mut members: Vec<Uuid> = Vec::with_capacity(requested.len() + 1);
        for id in requested {
            if !members.contains(id) {
                members.push(*id);
            }
        }

        for id in members.iter().filter(|id| **id != actor.id) {
            let user = self.store.users().get_by_id(*id).await.map_err(|e| {
                if e.is_not_found() {
                    AppError::not_found("Member not found")
                } else {
                    e
                }
            })?;
            if !user.authenticated {
                return Err(AppError::invalid_input(format!(
                    "Member {} is not authenticated",
                    user.id
                )));
            }
        }

        if !members.contains(&actor.id) {
            members.push(actor.id);
        }
        Ok(members)
    }

    pub async fn create(
        &self,
        actor: &User,
        group_key: &str,
        name: &str,
        requested: &[Uuid],
    ) -> AppResult<Vec<MembershipRow>> {
        let members = self.resolve_members(actor, requested).await?;
        let groups = self.store.groups();

        let rows = match self.mode {
            GroupWriteMode::Atomic => groups.create_group(group_key, name, &members).await?,
            GroupWriteMode::BestEffort => {
                match groups.list_by_group_key(group_key).await {
                    Ok(_) => return Err(AppError::AlreadyExists("Group already exists".into())),
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
                for (written, member_id) in members.iter().enumerate() {
                    if let Err(e) = groups.create_membership(group_key, name, *member_id).await {
                        warn!(group_key, written, error = %e, "group creation stopped part way");
                        return Err(e);
                    }
                }
                groups.list_by_group_key(group_key).await?
            }
        };

        info!(group_key, user_id = %actor.id, members = rows.len(), "group created");
        Ok(rows)
    }

    /// Groups `actor` belongs to, each as its full row set. Newest first.
    pub async fn list(&self, actor: &User) -> AppResult<Vec<Vec<MembershipRow>>> {
        let groups = self.store.groups();
        let own = match groups.list_by_member(actor.id).await {
            Ok(rows) => rows,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut out = Vec::with_capacity(own.len());
        for row in own {
            match groups.list_by_group_key(&row.group_key).await {
                Ok(rows) => out.push(rows),
                // Removed between the two reads.
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    /// Renames the group. With `requested` the member set is replaced as
    /// well (`actor` always stays); without it the members are left alone.
    pub async fn update(
        &self,
        actor: &User,
        group_key: &str,
        name: &str,
        requested: Option<&[Uuid]>,
    ) -> AppResult<Vec<MembershipRow>> {
        let current = require_member(self.store.groups(), actor, group_key).await?;
        let members = match requested {
            Some(requested) => self.resolve_members(actor, requested).await?,
            None => current.iter().map(|row| row.member_id).collect(),
        };
        let groups = self.store.groups();

        let rows = match self.mode {
            GroupWriteMode::Atomic => groups.update_group(group_key, name, &members).await?,
            GroupWriteMode::BestEffort => {
                for (renamed, row) in current.iter().enumerate() {
                    let row = MembershipRow {
                        name: name.to_string(),
                        ..row.clone()
                    };
                    if let Err(e) = groups.update_name(&row).await {
                        warn!(group_key, renamed, error = %e, "group rename stopped part way");
                        return Err(e);
                    }
                }
                for member_id in &members {
                    if !current.iter().any(|row| row.member_id == *member_id) {
                        groups.create_membership(group_key, name, *member_id).await?;
                    }
                }
                for row in current.iter().filter(|row| !members.contains(&row.member_id)) {
                    groups.delete_membership(row.id).await?;
                }
                groups.list_by_group_key(group_key).await?
            }
        };

        info!(group_key, user_id = %actor.id, members = rows.len(), "group updated");
        Ok(rows)
    }

    /// Returns the number of membership rows removed.
    pub async fn delete(&self, actor: &User, group_key: &str) -> AppResult<u64> {
        let rows = require_member(self.store.groups(), actor, group_key).await?;
        let groups = self.store.groups();

        let removed = match self.mode {
            GroupWriteMode::Atomic => groups.delete_group(group_key).await?,
            GroupWriteMode::BestEffort => {
                let mut removed = 0u64;
                for row in &rows {
                    match groups.delete_membership(row.id).await {
                        Ok(()) => removed += 1,
                        Err(e) if e.is_not_found() => continue,
                        Err(e) => {
                            warn!(group_key, removed, error = %e, "group deletion stopped part way");
                            return Err(e);
                        }
                    }
                }
                removed
            }
        };

        info!(group_key, user_id = %actor.id, removed, "group deleted");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use async_trait::async_trait;

    use super::*;
    use crate::{
        auth::services::Credentials,
        config::AppConfig,
        db::{self, SqliteStore},
        quotes::services::{QuoteQuery, Quotes},
        state::AppState,
        storage::{GroupStore, QuoteStore, UserStore},
    };

    async fn users(state: &AppState, names: &[&str]) -> Vec<User> {
        let creds = Credentials::new(state.store.users(), &state.hasher);
        let mut out = Vec::new();
        for name in names {
            out.push(
                creds
                    .create(&format!("{name}@example.com"), name, "password1".into())
                    .await
                    .unwrap(),
            );
        }
        out
    }

    fn member_ids(rows: &[MembershipRow]) -> Vec<Uuid> {
        let mut ids: Vec<_> = rows.iter().map(|r| r.member_id).collect();
        ids.sort();
        ids
    }

    fn sorted(mut ids: Vec<Uuid>) -> Vec<Uuid> {
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn create_adds_creator_and_collapses_duplicates() {
        for mode in [GroupWriteMode::Atomic, GroupWriteMode::BestEffort] {
            let state = AppState::fake().await;
            let u = users(&state, &["ada", "bob"]).await;
            let groups = Groups::new(state.store.as_ref(), mode);

            let rows = groups
                .create(&u[0], "club", "Club", &[u[1].id, u[1].id])
                .await
                .unwrap();
            assert_eq!(member_ids(&rows), sorted(vec![u[0].id, u[1].id]), "{mode:?}");
            assert!(rows.iter().all(|r| r.group_key == "club" && r.name == "Club"));

            let err = groups.create(&u[1], "club", "Again", &[]).await.unwrap_err();
            assert!(matches!(err, AppError::AlreadyExists(_)), "{mode:?}");
        }
    }

    #[tokio::test]
    async fn members_must_exist_and_be_authenticated() {
        let state = AppState::fake().await;
        let mut u = users(&state, &["ada", "bob"]).await;
        let groups = Groups::new(state.store.as_ref(), GroupWriteMode::Atomic);

        let err = groups
            .create(&u[0], "club", "Club", &[Uuid::new_v4()])
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        u[1].authenticated = false;
        state.store.users().update(&u[1]).await.unwrap();
        let err = groups.create(&u[0], "club", "Club", &[u[1].id]).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));

        assert!(state.store.groups().list_by_group_key("club").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn list_returns_only_own_groups() {
        let state = AppState::fake().await;
        let u = users(&state, &["ada", "bob", "eve"]).await;
        let groups = Groups::new(state.store.as_ref(), GroupWriteMode::Atomic);

        assert!(groups.list(&u[0]).await.unwrap().is_empty());

        groups.create(&u[0], "one", "One", &[u[1].id]).await.unwrap();
        groups.create(&u[1], "two", "Two", &[]).await.unwrap();
        groups.create(&u[2], "three", "Three", &[]).await.unwrap();

        let bob: Vec<_> = groups
            .list(&u[1])
            .await
            .unwrap()
            .into_iter()
            .map(|rows| rows[0].group_key.clone())
            .collect();
        assert_eq!(bob, ["two", "one"]);

        let ada = groups.list(&u[0]).await.unwrap();
        assert_eq!(ada.len(), 1);
        assert_eq!(ada[0].len(), 2);
    }

    #[tokio::test]
    async fn update_renames_and_reconciles_members() {
        for mode in [GroupWriteMode::Atomic, GroupWriteMode::BestEffort] {
            let state = AppState::fake().await;
            let u = users(&state, &["ada", "bob", "cat", "eve"]).await;
            let groups = Groups::new(state.store.as_ref(), mode);
            groups.create(&u[0], "club", "Club", &[u[1].id]).await.unwrap();

            let err = groups.update(&u[3], "club", "Mine", None).await.unwrap_err();
            assert!(matches!(err, AppError::Forbidden(_)), "{mode:?}");

            // Drops bob, adds cat, keeps the acting user.
            let rows = groups.update(&u[0], "club", "Renamed", Some(&[u[2].id][..])).await.unwrap();
            assert_eq!(member_ids(&rows), sorted(vec![u[0].id, u[2].id]), "{mode:?}");
            assert!(rows.iter().all(|r| r.name == "Renamed"), "{mode:?}");

            let err = groups.update(&u[0], "missing", "x", None).await.unwrap_err();
            assert!(err.is_not_found(), "{mode:?}");
        }
    }

    #[tokio::test]
    async fn delete_removes_exactly_the_group_rows() {
        for mode in [GroupWriteMode::Atomic, GroupWriteMode::BestEffort] {
            let state = AppState::fake().await;
            let u = users(&state, &["ada", "bob", "cat"]).await;
            let groups = Groups::new(state.store.as_ref(), mode);
            groups.create(&u[0], "club", "Club", &[u[1].id, u[2].id]).await.unwrap();
            groups.create(&u[1], "other", "Other", &[]).await.unwrap();

            assert!(matches!(
                groups.delete(&u[2], "other").await.unwrap_err(),
                AppError::Forbidden(_)
            ));

            assert_eq!(groups.delete(&u[0], "club").await.unwrap(), 3, "{mode:?}");
            let store = state.store.groups();
            assert!(store.list_by_group_key("club").await.unwrap_err().is_not_found());
            assert_eq!(store.list_by_group_key("other").await.unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn reused_group_key_does_not_inherit_quotes() {
        for mode in [GroupWriteMode::Atomic, GroupWriteMode::BestEffort] {
            let state = AppState::fake().await;
            let u = users(&state, &["ada", "eve"]).await;
            let groups = Groups::new(state.store.as_ref(), mode);
            let quotes = Quotes::new(state.store.as_ref());

            groups.create(&u[0], "diary", "Diary", &[]).await.unwrap();
            let secret = quotes
                .create(&u[0], "secret".into(), None, "diary".into())
                .await
                .unwrap();
            groups.delete(&u[0], "diary").await.unwrap();
            assert!(state.store.quotes().get_by_id(secret.id).await.unwrap_err().is_not_found());

            groups.create(&u[1], "diary", "Mine now", &[]).await.unwrap();
            let query = QuoteQuery {
                group_key: Some("diary".into()),
                ..Default::default()
            };
            assert!(quotes.list(&u[1], query.clone()).await.unwrap().is_empty(), "{mode:?}");
            assert!(quotes.random(&u[1], query).await.unwrap_err().is_not_found(), "{mode:?}");
            assert!(quotes.get(&u[1], secret.id).await.unwrap_err().is_not_found(), "{mode:?}");
        }
    }

    #[tokio::test]
    async fn rename_without_member_list_keeps_members() {
        for mode in [GroupWriteMode::Atomic, GroupWriteMode::BestEffort] {
            let state = AppState::fake().await;
            let u = users(&state, &["ada", "bob", "cat"]).await;
            let groups = Groups::new(state.store.as_ref(), mode);
            let before = groups
                .create(&u[0], "club", "Club", &[u[1].id, u[2].id])
                .await
                .unwrap();

            let rows = groups.update(&u[0], "club", "Renamed", None).await.unwrap();
            assert_eq!(rows.len(), 3, "{mode:?}");
            assert_eq!(member_ids(&rows), member_ids(&before), "{mode:?}");
            assert!(rows.iter().all(|r| r.name == "Renamed"), "{mode:?}");
        }
    }

    /// Fails the n-th call of one operation.
    #[derive(Default)]
    struct Fault {
        fail_on: Option<usize>,
        calls: AtomicUsize,
    }

    impl Fault {
        fn on(call: usize) -> Self {
            Self {
                fail_on: Some(call),
                calls: AtomicUsize::new(0),
            }
        }

        fn hit(&self) -> AppResult<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on == Some(call) {
                return Err(AppError::internal("injected failure"));
            }
            Ok(())
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    /// SQLite group store with failures injected into the row-level writes.
    #[derive(Default)]
    struct Faults {
        creates: Fault,
        renames: Fault,
        deletes: Fault,
    }

    struct FaultyGroups {
        inner: SqliteStore,
        faults: Faults,
    }

    #[async_trait]
    impl GroupStore for FaultyGroups {
        async fn create_membership(&self, key: &str, name: &str, member: Uuid) -> AppResult<MembershipRow> {
            self.faults.creates.hit()?;
            self.inner.groups().create_membership(key, name, member).await
        }
        async fn get_membership(&self, id: Uuid) -> AppResult<MembershipRow> {
            self.inner.groups().get_membership(id).await
        }
        async fn list_by_group_key(&self, key: &str) -> AppResult<Vec<MembershipRow>> {
            self.inner.groups().list_by_group_key(key).await
        }
        async fn list_by_member(&self, member: Uuid) -> AppResult<Vec<MembershipRow>> {
            self.inner.groups().list_by_member(member).await
        }
        async fn update_name(&self, row: &MembershipRow) -> AppResult<MembershipRow> {
            self.faults.renames.hit()?;
            self.inner.groups().update_name(row).await
        }
        async fn delete_membership(&self, id: Uuid) -> AppResult<()> {
            self.faults.deletes.hit()?;
            self.inner.groups().delete_membership(id).await
        }
        async fn create_group(&self, key: &str, name: &str, members: &[Uuid]) -> AppResult<Vec<MembershipRow>> {
            self.inner.groups().create_group(key, name, members).await
        }
        async fn update_group(&self, key: &str, name: &str, members: &[Uuid]) -> AppResult<Vec<MembershipRow>> {
            self.inner.groups().update_group(key, name, members).await
        }
        async fn delete_group(&self, key: &str) -> AppResult<u64> {
            self.inner.groups().delete_group(key).await
        }
    }

    impl Store for FaultyGroups {
        fn users(&self) -> &dyn UserStore {
            self.inner.users()
        }
        fn groups(&self) -> &dyn GroupStore {
            self
        }
        fn quotes(&self) -> &dyn QuoteStore {
            self.inner.quotes()
        }
    }

    async fn faulty(faults: Faults) -> (Arc<FaultyGroups>, AppState) {
        let db = db::connect_in_memory().await.unwrap();
        let store = Arc::new(FaultyGroups {
            inner: SqliteStore::new(db),
            faults,
        });
        let state = AppState::from_parts(store.clone(), AppConfig::fake()).unwrap();
        (store, state)
    }

    #[tokio::test]
    async fn best_effort_delete_keeps_rows_removed_before_failure() {
        let (store, state) = faulty(Faults {
            deletes: Fault::on(2),
            ..Default::default()
        })
        .await;
        let u = users(&state, &["ada", "bob", "cat"]).await;

        let groups = Groups::new(state.store.as_ref(), GroupWriteMode::BestEffort);
        let before = groups.create(&u[0], "club", "Club", &[u[1].id, u[2].id]).await.unwrap();
        assert_eq!(before.len(), 3);

        let err = groups.delete(&u[0], "club").await.unwrap_err();
        assert_eq!(err.code(), "INTERNAL_ERROR");

        let after = state.store.groups().list_by_group_key("club").await.unwrap();
        assert_eq!(after.len(), 2);
        assert!(!after.iter().any(|row| row.id == before[0].id));
        assert_eq!(store.faults.deletes.calls(), 2);
    }

    #[tokio::test]
    async fn best_effort_create_keeps_rows_written_before_failure() {
        let (store, state) = faulty(Faults {
            creates: Fault::on(2),
            ..Default::default()
        })
        .await;
        let u = users(&state, &["ada", "bob", "cat"]).await;
        let groups = Groups::new(state.store.as_ref(), GroupWriteMode::BestEffort);

        // Written in request order, creator last: bob succeeds, cat fails.
        let err = groups
            .create(&u[0], "club", "Club", &[u[1].id, u[2].id])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INTERNAL_ERROR");
        assert_eq!(store.faults.creates.calls(), 2);

        let rows = state.store.groups().list_by_group_key("club").await.unwrap();
        assert_eq!(member_ids(&rows), vec![u[1].id]);
    }

    #[tokio::test]
    async fn best_effort_rename_keeps_renames_before_failure() {
        let (store, state) = faulty(Faults {
            renames: Fault::on(2),
            ..Default::default()
        })
        .await;
        let u = users(&state, &["ada", "bob", "cat"]).await;
        state
            .store
            .groups()
            .create_group("club", "Club", &[u[0].id, u[1].id, u[2].id])
            .await
            .unwrap();
        let groups = Groups::new(state.store.as_ref(), GroupWriteMode::BestEffort);

        let err = groups.update(&u[0], "club", "Renamed", None).await.unwrap_err();
        assert_eq!(err.code(), "INTERNAL_ERROR");
        assert_eq!(store.faults.renames.calls(), 2);

        // The first rename was committed and is not rolled back.
        let rows = state.store.groups().list_by_group_key("club").await.unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.name == "Renamed"));
    }

    #[tokio::test]
    async fn best_effort_member_add_keeps_members_added_before_failure() {
        let (store, state) = faulty(Faults {
            creates: Fault::on(2),
            ..Default::default()
        })
        .await;
        let u = users(&state, &["ada", "bob", "cat", "dan"]).await;
        state
            .store
            .groups()
            .create_group("club", "Club", &[u[0].id, u[1].id])
            .await
            .unwrap();
        let groups = Groups::new(state.store.as_ref(), GroupWriteMode::BestEffort);

        let err = groups
            .update(&u[0], "club", "Club", Some(&[u[1].id, u[2].id, u[3].id][..]))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INTERNAL_ERROR");
        assert_eq!(store.faults.creates.calls(), 2);

        let rows = state.store.groups().list_by_group_key("club").await.unwrap();
        assert_eq!(member_ids(&rows), sorted(vec![u[0].id, u[1].id, u[2].id]));
    }

    #[tokio::test]
    async fn atomic_create_leaves_nothing_behind_on_failure() {
        let state = AppState::fake().await;
        let u = users(&state, &["ada"]).await;

        // Member validation is skipped here so the failure comes from the store.
        let err = state
            .store
            .groups()
            .create_group("club", "Club", &[u[0].id, Uuid::new_v4()])
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(state.store.groups().list_by_group_key("club").await.unwrap_err().is_not_found());
        assert!(state.store.groups().list_by_member(u[0].id).await.unwrap_err().is_not_found());
    }
}
