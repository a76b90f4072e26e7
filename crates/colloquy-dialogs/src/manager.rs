//! Runs a root dialog once per turn.
//!
//! ```text
//! on_turn(ctx)
//!   ├─ load conversation (and user) state      ── fails fast on storage errors
//!   ├─ stack empty?  begin(root)  :  continue()
//!   ├─ stage the stack in conversation state
//!   └─ save states                             ── warns if replies already went out
//! ```

use std::sync::Arc;

use colloquy_core::{BotCallback, BotState, TurnContext, into_callback};
use tracing::{debug, warn};

use crate::dialog::Dialog;
use crate::dialog_set::DialogSet;
use crate::error::{DialogError, DialogResult};
use crate::instance::{DialogState, DialogTurnResult};

/// Property under which the dialog stack is stored in conversation state.
pub const DIALOG_STATE_PROPERTY: &str = "DialogState";

/// Drives a root dialog against persisted conversation state.
///
/// ```rust,ignore
/// let storage: BoxedStorage = Arc::new(MemoryStorage::new());
/// let manager = DialogManager::new(BotState::conversation(storage), root_dialog)?;
/// runtime.process_activity(activity, manager.callback()).await?;
/// ```
#[derive(Clone)]
pub struct DialogManager {
    dialogs: Arc<DialogSet>,
    root_dialog_id: String,
    conversation_state: BotState,
    user_state: Option<BotState>,
}

impl DialogManager {
    /// Creates a manager whose stack lives in `conversation_state`.
    pub fn new(conversation_state: BotState, root: impl Dialog) -> DialogResult<Self> {
        let root_dialog_id = root.id().to_string();
        let accessor = conversation_state.create_property::<DialogState>(DIALOG_STATE_PROPERTY);
        let mut dialogs = DialogSet::new().with_state(accessor);
        dialogs.add(root)?;

        Ok(Self {
            dialogs: Arc::new(dialogs),
            root_dialog_id,
            conversation_state,
            user_state: None,
        })
    }

    /// Also loads and saves `user_state` around each turn.
    pub fn with_user_state(mut self, user_state: BotState) -> Self {
        self.user_state = Some(user_state);
        self
    }

    /// Registers an additional dialog the root can start by id.
    pub fn add_dialog(mut self, dialog: impl Dialog) -> DialogResult<Self> {
        Arc::make_mut(&mut self.dialogs).add(dialog)?;
        Ok(self)
    }

    /// Returns the registered dialogs.
    pub fn dialogs(&self) -> &Arc<DialogSet> {
        &self.dialogs
    }

    /// Returns the id of the root dialog.
    pub fn root_dialog_id(&self) -> &str {
        &self.root_dialog_id
    }

    /// Returns the conversation state holding the stack.
    pub fn conversation_state(&self) -> &BotState {
        &self.conversation_state
    }

    fn states(&self) -> impl Iterator<Item = &BotState> {
        std::iter::once(&self.conversation_state).chain(self.user_state.as_ref())
    }

    /// Runs one turn of the root dialog.
    pub async fn on_turn(&self, ctx: Arc<TurnContext>) -> DialogResult<DialogTurnResult> {
        for state in self.states() {
            state.load(&ctx, false).await?;
        }

        let dc = self.dialogs.create_context(Arc::clone(&ctx)).await?;
        let result = if dc.active_dialog().is_none() {
            debug!(root = %self.root_dialog_id, "Starting root dialog");
            dc.begin_dialog(&self.root_dialog_id, None).await?
        } else {
            dc.continue_dialog().await?
        };

        dc.save().await?;
        for state in self.states() {
            if let Err(err) = state.save_changes(&ctx, false).await {
                if ctx.responded() {
                    warn!(
                        scope = ?state.scope(),
                        error = %err,
                        "Dialog state save failed after activities were sent; replies and stored state are out of sync"
                    );
                }
                return Err(DialogError::Bot(err));
            }
        }

        debug!(status = ?result.status, "Dialog turn finished");
        Ok(result)
    }

    /// Wraps [`on_turn`](Self::on_turn) as a pipeline callback.
    pub fn callback(&self) -> BotCallback {
        let manager = self.clone();
        into_callback(move |ctx: Arc<TurnContext>| {
            let manager = manager.clone();
            async move {
                manager.on_turn(ctx).await?;
                Ok(())
            }
        })
    }
}

impl std::fmt::Debug for DialogManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialogManager")
            .field("root_dialog_id", &self.root_dialog_id)
            .field("dialogs", &self.dialogs)
            .field("user_state", &self.user_state.is_some())
            .finish()
    }
}
