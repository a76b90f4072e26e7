//! The dialog registry.

use std::collections::HashMap;
use std::sync::Arc;

use colloquy_core::{StatePropertyAccessor, TurnContext};

use crate::context::DialogContext;
use crate::dialog::Dialog;
use crate::error::{DialogError, DialogResult};
use crate::instance::DialogState;

/// A named registry of dialogs, optionally bound to the state property the
/// conversation's stack is persisted in.
///
/// ```rust,ignore
/// let convo = BotState::conversation(storage);
/// let mut dialogs = DialogSet::new().with_state(convo.create_property("DialogState"));
/// dialogs.add(greeting_waterfall)?;
/// let dialogs = Arc::new(dialogs);
///
/// let dc = dialogs.create_context(ctx).await?;
/// ```
#[derive(Clone, Default)]
pub struct DialogSet {
    dialogs: HashMap<String, Arc<dyn Dialog>>,
    order: Vec<String>,
    state: Option<StatePropertyAccessor<DialogState>>,
}

impl DialogSet {
    /// Creates an empty set without persistence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds the set to the property its stack is persisted in.
    pub fn with_state(mut self, accessor: StatePropertyAccessor<DialogState>) -> Self {
        self.state = Some(accessor);
        self
    }

    /// Registers a dialog. Fails if its id is already taken.
    pub fn add(&mut self, dialog: impl Dialog) -> DialogResult<&mut Self> {
        self.add_arc(Arc::new(dialog))
    }

    /// Registers an already shared dialog.
    pub fn add_arc(&mut self, dialog: Arc<dyn Dialog>) -> DialogResult<&mut Self> {
        let id = dialog.id().to_string();
        if self.dialogs.contains_key(&id) {
            return Err(DialogError::DuplicateDialog { id });
        }
        self.order.push(id.clone());
        self.dialogs.insert(id, dialog);
        Ok(self)
    }

    /// Returns the dialog registered under `id`.
    pub fn find(&self, id: &str) -> Option<Arc<dyn Dialog>> {
        self.dialogs.get(id).cloned()
    }

    /// Returns the registered ids in registration order.
    pub fn ids(&self) -> &[String] {
        &self.order
    }

    /// Returns the number of registered dialogs.
    pub fn len(&self) -> usize {
        self.dialogs.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.dialogs.is_empty()
    }

    /// Returns the accessor the stack is persisted through, if any.
    pub fn state_accessor(&self) -> Option<&StatePropertyAccessor<DialogState>> {
        self.state.as_ref()
    }

    /// Loads the conversation's stack and wraps it in a [`DialogContext`].
    ///
    /// A storage read failure fails the call; no dialog logic runs against
    /// a stack that could not be loaded.
    pub async fn create_context(self: &Arc<Self>, turn: Arc<TurnContext>) -> DialogResult<DialogContext> {
        let accessor = self.state.as_ref().ok_or(DialogError::MissingState)?;
        let state = accessor.get(&turn).await?.unwrap_or_default();
        Ok(DialogContext::new(Arc::clone(self), turn, state))
    }

    /// Wraps an already loaded stack in a [`DialogContext`].
    pub fn create_context_from_state(
        self: &Arc<Self>,
        turn: Arc<TurnContext>,
        state: DialogState,
    ) -> DialogContext {
        DialogContext::new(Arc::clone(self), turn, state)
    }
}

impl std::fmt::Debug for DialogSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialogSet")
            .field("dialogs", &self.order)
            .field("persisted", &self.state.is_some())
            .finish()
    }
}
