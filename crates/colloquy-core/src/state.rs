//! Scoped bot state on top of [`Storage`].
//!
//! A [`BotState`] maps the current turn to one storage record (per
//! conversation, per user, or per user within a conversation), caches the
//! record in the turn's [`TurnState`](crate::TurnState) and writes it back
//! only when it changed. Typed views of individual properties are created
//! with [`BotState::create_property`].
//!
//! ```text
//! load(ctx) ──► storage.read(key) ──► cache {state, hash, e_tag} in turn state
//!                                          │
//!            accessor.get / set ◄──────────┘
//!                                          │
//! save_changes(ctx) ──► hash changed? ──► storage.write(key, e_tag) ──► new e_tag
//! ```
//!
//! Saves are conditioned on the e-tag that was loaded, so a turn working on
//! a stale copy fails with [`StorageError::ETagConflict`](crate::StorageError)
//! instead of overwriting a newer version.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::context::TurnContext;
use crate::error::{BotError, BotResult};
use crate::storage::{BoxedStorage, StoreItem};

/// Which storage record a [`BotState`] is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateScope {
    /// `{channel}/conversations/{conversation}`
    Conversation,
    /// `{channel}/users/{user}`
    User,
    /// `{channel}/conversations/{conversation}/users/{user}`
    PrivateConversation,
}

impl StateScope {
    /// Returns the storage key for the turn's inbound activity.
    pub fn storage_key(&self, ctx: &TurnContext) -> BotResult<String> {
        let activity = ctx.activity();
        let channel = required(&activity.channel_id, "activity.channel_id")?;
        match self {
            Self::Conversation => {
                let conversation = required(&activity.conversation.id, "activity.conversation.id")?;
                Ok(format!("{channel}/conversations/{conversation}"))
            }
            Self::User => {
                let user = required(&activity.from.id, "activity.from.id")?;
                Ok(format!("{channel}/users/{user}"))
            }
            Self::PrivateConversation => {
                let conversation = required(&activity.conversation.id, "activity.conversation.id")?;
                let user = required(&activity.from.id, "activity.from.id")?;
                Ok(format!("{channel}/conversations/{conversation}/users/{user}"))
            }
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Conversation => "ConversationState",
            Self::User => "UserState",
            Self::PrivateConversation => "PrivateConversationState",
        }
    }
}

fn required<'a>(value: &'a str, field: &str) -> BotResult<&'a str> {
    if value.is_empty() {
        Err(BotError::invalid_argument(format!("{field} is required")))
    } else {
        Ok(value)
    }
}

#[derive(Debug, Default)]
struct CachedState {
    state: Map<String, Value>,
    hash: String,
    e_tag: Option<String>,
}

impl CachedState {
    fn is_changed(&self) -> bool {
        compute_hash(&self.state) != self.hash
    }
}

fn compute_hash(state: &Map<String, Value>) -> String {
    serde_json::to_string(state).unwrap_or_default()
}

type SharedCache = Arc<Mutex<CachedState>>;

// =============================================================================
// BotState
// =============================================================================

/// State bound to one storage scope.
#[derive(Clone)]
pub struct BotState {
    storage: BoxedStorage,
    scope: StateScope,
    cache_key: String,
}

impl BotState {
    /// Creates state for the given scope.
    pub fn new(storage: BoxedStorage, scope: StateScope) -> Self {
        Self {
            storage,
            scope,
            cache_key: format!("colloquy.state.{}", scope.label()),
        }
    }

    /// Per-conversation state.
    pub fn conversation(storage: BoxedStorage) -> Self {
        Self::new(storage, StateScope::Conversation)
    }

    /// Per-user state.
    pub fn user(storage: BoxedStorage) -> Self {
        Self::new(storage, StateScope::User)
    }

    /// Per-user-per-conversation state.
    pub fn private_conversation(storage: BoxedStorage) -> Self {
        Self::new(storage, StateScope::PrivateConversation)
    }

    /// Returns the scope.
    pub fn scope(&self) -> StateScope {
        self.scope
    }

    /// Returns the underlying storage.
    pub fn storage(&self) -> &BoxedStorage {
        &self.storage
    }

    /// Returns the storage key for this turn.
    pub fn storage_key(&self, ctx: &TurnContext) -> BotResult<String> {
        self.scope.storage_key(ctx)
    }

    /// Creates a typed accessor for the property `name`.
    pub fn create_property<T>(&self, name: impl Into<String>) -> StatePropertyAccessor<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
    {
        StatePropertyAccessor {
            state: self.clone(),
            name: name.into(),
            _marker: PhantomData,
        }
    }

    fn cached(&self, ctx: &TurnContext) -> Option<SharedCache> {
        ctx.turn_state().get_arc::<Mutex<CachedState>>(&self.cache_key)
    }

    fn loaded(&self, ctx: &TurnContext) -> BotResult<SharedCache> {
        self.cached(ctx).ok_or_else(|| {
            BotError::invalid_argument(format!("{} has not been loaded", self.scope.label()))
        })
    }

    /// Returns `true` if the state has been loaded this turn.
    pub fn is_loaded(&self, ctx: &TurnContext) -> bool {
        self.cached(ctx).is_some()
    }

    /// Returns `true` if the cached state differs from what was loaded.
    pub fn has_changes(&self, ctx: &TurnContext) -> bool {
        self.cached(ctx).is_some_and(|c| c.lock().is_changed())
    }

    /// Loads the record into the turn cache.
    ///
    /// Does nothing if already loaded, unless `force` is set.
    pub async fn load(&self, ctx: &TurnContext, force: bool) -> BotResult<()> {
        if !force && self.is_loaded(ctx) {
            return Ok(());
        }

        let key = self.storage_key(ctx)?;
        let mut items = self.storage.read(std::slice::from_ref(&key)).await?;
        let (state, e_tag) = match items.remove(&key) {
            Some(StoreItem {
                value: Value::Object(map),
                e_tag,
            }) => (map, e_tag),
            Some(StoreItem { e_tag, .. }) => (Map::new(), e_tag),
            None => (Map::new(), None),
        };

        trace!(key = %key, e_tag = ?e_tag, "Loaded state");
        let hash = compute_hash(&state);
        ctx.turn_state().insert_arc(
            self.cache_key.clone(),
            Arc::new(Mutex::new(CachedState { state, hash, e_tag })),
        );
        Ok(())
    }

    /// Writes the cached record back if it changed, or always if `force`.
    pub async fn save_changes(&self, ctx: &TurnContext, force: bool) -> BotResult<()> {
        let Some(cache) = self.cached(ctx) else {
            return Ok(());
        };

        let (value, e_tag, hash) = {
            let cached = cache.lock();
            if !force && !cached.is_changed() {
                return Ok(());
            }
            (
                Value::Object(cached.state.clone()),
                cached.e_tag.clone(),
                compute_hash(&cached.state),
            )
        };

        let key = self.storage_key(ctx)?;
        let item = StoreItem { value, e_tag };
        let mut e_tags = self
            .storage
            .write(HashMap::from([(key.clone(), item)]))
            .await?;

        let mut cached = cache.lock();
        cached.hash = hash;
        cached.e_tag = e_tags.remove(&key);
        debug!(key = %key, e_tag = ?cached.e_tag, "Saved state");
        Ok(())
    }

    /// Empties the cached record. The empty record is persisted by the next
    /// [`save_changes`](Self::save_changes).
    pub fn clear(&self, ctx: &TurnContext) {
        match self.cached(ctx) {
            Some(cache) => {
                let mut cached = cache.lock();
                cached.state = Map::new();
                cached.hash = String::new();
            }
            None => ctx.turn_state().insert_arc(
                self.cache_key.clone(),
                Arc::new(Mutex::new(CachedState::default())),
            ),
        }
    }

    /// Drops the cached record and deletes it from storage.
    pub async fn delete(&self, ctx: &TurnContext) -> BotResult<()> {
        ctx.turn_state().remove(&self.cache_key);
        let key = self.storage_key(ctx)?;
        self.storage.delete(&[key]).await?;
        Ok(())
    }

    /// Returns a property of the loaded record.
    pub fn get_property_value(&self, ctx: &TurnContext, name: &str) -> BotResult<Option<Value>> {
        Ok(self.loaded(ctx)?.lock().state.get(name).cloned())
    }

    /// Sets a property of the loaded record.
    pub fn set_property_value(&self, ctx: &TurnContext, name: &str, value: Value) -> BotResult<()> {
        self.loaded(ctx)?.lock().state.insert(name.to_string(), value);
        Ok(())
    }

    /// Removes a property of the loaded record.
    pub fn delete_property_value(&self, ctx: &TurnContext, name: &str) -> BotResult<()> {
        self.loaded(ctx)?.lock().state.remove(name);
        Ok(())
    }
}

impl std::fmt::Debug for BotState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotState")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// StatePropertyAccessor
// =============================================================================

/// A typed view of one property of a [`BotState`].
///
/// Every operation loads the state first if the turn has not loaded it yet.
pub struct StatePropertyAccessor<T> {
    state: BotState,
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for StatePropertyAccessor<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            name: self.name.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> StatePropertyAccessor<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    /// Returns the property name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the state this property belongs to.
    pub fn bot_state(&self) -> &BotState {
        &self.state
    }

    /// Returns the property value, if set.
    pub async fn get(&self, ctx: &TurnContext) -> BotResult<Option<T>> {
        self.state.load(ctx, false).await?;
        self.state
            .get_property_value(ctx, &self.name)?
            .map(serde_json::from_value)
            .transpose()
            .map_err(BotError::from)
    }

    /// Returns the property value, storing `default()` first if unset.
    pub async fn get_or_insert_with<F>(&self, ctx: &TurnContext, default: F) -> BotResult<T>
    where
        F: FnOnce() -> T,
    {
        if let Some(value) = self.get(ctx).await? {
            return Ok(value);
        }
        let value = default();
        self.state
            .set_property_value(ctx, &self.name, serde_json::to_value(&value)?)?;
        Ok(value)
    }

    /// Sets the property value.
    pub async fn set(&self, ctx: &TurnContext, value: &T) -> BotResult<()> {
        self.state.load(ctx, false).await?;
        self.state
            .set_property_value(ctx, &self.name, serde_json::to_value(value)?)
    }

    /// Removes the property.
    pub async fn delete(&self, ctx: &TurnContext) -> BotResult<()> {
        self.state.load(ctx, false).await?;
        self.state.delete_property_value(ctx, &self.name)
    }
}

impl<T> std::fmt::Debug for StatePropertyAccessor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatePropertyAccessor")
            .field("scope", &self.state.scope)
            .field("name", &self.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::storage::{MemoryStorage, Storage};
    use crate::test_support::{RecordingAdapter, inbound, turn};
    use serde::Deserialize;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        visits: u32,
    }

    fn setup() -> (Arc<MemoryStorage>, BotState) {
        let storage = Arc::new(MemoryStorage::new());
        let state = BotState::conversation(storage.clone());
        (storage, state)
    }

    fn ctx() -> Arc<TurnContext> {
        turn(&RecordingAdapter::new(), inbound("hi"))
    }

    #[tokio::test]
    async fn test_scope_keys() {
        let ctx = ctx();
        assert_eq!(
            StateScope::Conversation.storage_key(&ctx).unwrap(),
            "test/conversations/conv1"
        );
        assert_eq!(StateScope::User.storage_key(&ctx).unwrap(), "test/users/user1");
        assert_eq!(
            StateScope::PrivateConversation.storage_key(&ctx).unwrap(),
            "test/conversations/conv1/users/user1"
        );
    }

    #[tokio::test]
    async fn test_missing_conversation_id_rejected() {
        let mut activity = inbound("hi");
        activity.conversation.id.clear();
        let ctx = turn(&RecordingAdapter::new(), activity);
        let (_, state) = setup();
        assert!(matches!(
            state.load(&ctx, false).await,
            Err(BotError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_property_persists_across_turns() {
        let (storage, state) = setup();
        let profile = state.create_property::<Profile>("profile");

        let first = ctx();
        let mut value = profile.get_or_insert_with(&first, Profile::default).await.unwrap();
        value.visits += 1;
        value.name = "Ada".into();
        profile.set(&first, &value).await.unwrap();
        state.save_changes(&first, false).await.unwrap();
        assert_eq!(storage.len(), 1);

        let second = ctx();
        let loaded = profile.get(&second).await.unwrap();
        assert_eq!(
            loaded,
            Some(Profile {
                name: "Ada".into(),
                visits: 1
            })
        );
    }

    #[tokio::test]
    async fn test_unchanged_state_is_not_written() {
        let (storage, state) = setup();
        let ctx = ctx();
        state.load(&ctx, false).await.unwrap();
        assert!(!state.has_changes(&ctx));
        state.save_changes(&ctx, false).await.unwrap();
        assert!(storage.is_empty());

        state.save_changes(&ctx, true).await.unwrap();
        assert_eq!(storage.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_save_conflicts() {
        let (storage, state) = setup();
        let counter = state.create_property::<u32>("count");

        let seed = ctx();
        counter.set(&seed, &1).await.unwrap();
        state.save_changes(&seed, false).await.unwrap();

        let a = ctx();
        let b = ctx();
        counter.set(&a, &2).await.unwrap();
        counter.set(&b, &3).await.unwrap();
        state.save_changes(&a, false).await.unwrap();

        let err = state.save_changes(&b, false).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(
            err,
            BotError::Storage(StorageError::ETagConflict { .. })
        ));

        let key = state.storage_key(&a).unwrap();
        let stored = storage.read(&[key.clone()]).await.unwrap();
        assert_eq!(stored[&key].value["count"], 2);
    }

    #[tokio::test]
    async fn test_clear_and_delete() {
        let (storage, state) = setup();
        let counter = state.create_property::<u32>("count");

        let ctx = ctx();
        counter.set(&ctx, &5).await.unwrap();
        state.save_changes(&ctx, false).await.unwrap();

        state.clear(&ctx);
        assert_eq!(counter.get(&ctx).await.unwrap(), None);
        state.save_changes(&ctx, false).await.unwrap();
        assert_eq!(storage.len(), 1);

        state.delete(&ctx).await.unwrap();
        assert!(storage.is_empty());
        assert!(!state.is_loaded(&ctx));
    }
}
