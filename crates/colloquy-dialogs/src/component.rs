//! Dialogs that encapsulate their own dialog set.
//!
//! A [`ComponentDialog`] looks like a single frame on the outer stack, but
//! runs a private inner stack of its own dialogs. The inner stack is stored
//! in the component frame's state under `dialogs`, so it is persisted with
//! the outer stack:
//!
//! ```text
//! outer: [ …, { id: "checkout", state: { dialogs: { dialogStack: [ inner frames ] } } } ]
//! ```
//!
//! When the inner stack finishes, the component ends on the outer stack with
//! the inner result.

use std::sync::Arc;

use async_trait::async_trait;
use colloquy_core::TurnContext;
use serde_json::Value;

use crate::context::DialogContext;
use crate::dialog::Dialog;
use crate::dialog_set::DialogSet;
use crate::error::{DialogError, DialogResult};
use crate::instance::{DialogInstance, DialogReason, DialogState, DialogTurnResult, DialogTurnStatus};

const KEY_DIALOGS: &str = "dialogs";

/// A dialog composed of an inner [`DialogSet`].
///
/// ```rust,ignore
/// let checkout = ComponentDialog::new("checkout")
///     .with_dialog(WaterfallDialog::new("address").step(...))?
///     .with_dialog(Prompt::text("street"))?;
/// ```
#[derive(Clone)]
pub struct ComponentDialog {
    id: String,
    dialogs: Arc<DialogSet>,
    initial_dialog_id: Option<String>,
}

impl ComponentDialog {
    /// Creates an empty component.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            dialogs: Arc::new(DialogSet::new()),
            initial_dialog_id: None,
        }
    }

    /// Adds an inner dialog. The first one added is started on begin unless
    /// [`with_initial_dialog`](Self::with_initial_dialog) says otherwise.
    pub fn with_dialog(mut self, dialog: impl Dialog) -> DialogResult<Self> {
        let id = dialog.id().to_string();
        Arc::make_mut(&mut self.dialogs).add(dialog)?;
        self.initial_dialog_id.get_or_insert(id);
        Ok(self)
    }

    /// Sets the inner dialog started on begin.
    pub fn with_initial_dialog(mut self, id: impl Into<String>) -> Self {
        self.initial_dialog_id = Some(id.into());
        self
    }

    /// Returns the inner dialogs.
    pub fn dialogs(&self) -> &Arc<DialogSet> {
        &self.dialogs
    }

    fn inner_state(instance_state: &serde_json::Map<String, Value>) -> DialogResult<DialogState> {
        match instance_state.get(KEY_DIALOGS) {
            Some(value) => Ok(serde_json::from_value(value.clone())?),
            None => Ok(DialogState::new()),
        }
    }

    fn inner_context(&self, outer: &DialogContext) -> DialogResult<DialogContext> {
        let state = Self::inner_state(&outer.state()?)?;
        Ok(DialogContext::with_parent(
            Arc::clone(&self.dialogs),
            outer,
            state,
        ))
    }

    fn detached_context(
        &self,
        ctx: &Arc<TurnContext>,
        instance: &DialogInstance,
    ) -> DialogResult<DialogContext> {
        let state = Self::inner_state(&instance.state)?;
        Ok(DialogContext::new(
            Arc::clone(&self.dialogs),
            Arc::clone(ctx),
            state,
        ))
    }

    /// Persists the inner stack while it waits, or ends the component.
    async fn settle(
        &self,
        outer: &DialogContext,
        inner: &DialogContext,
        turn: DialogTurnResult,
    ) -> DialogResult<DialogTurnResult> {
        if turn.status == DialogTurnStatus::Waiting {
            let value = serde_json::to_value(inner.dialog_state())?;
            outer.set_state_value(KEY_DIALOGS, value)?;
            return Ok(DialogTurnResult::end_of_turn());
        }
        outer.end_dialog(turn.result).await
    }
}

#[async_trait]
impl Dialog for ComponentDialog {
    fn id(&self) -> &str {
        &self.id
    }

    async fn begin_dialog(
        &self,
        outer: &DialogContext,
        options: Option<Value>,
    ) -> DialogResult<DialogTurnResult> {
        let initial = self
            .initial_dialog_id
            .as_deref()
            .ok_or_else(|| DialogError::not_found(format!("{}/<initial>", self.id)))?;

        let inner = self.inner_context(outer)?;
        let turn = inner.begin_dialog(initial, options).await?;
        self.settle(outer, &inner, turn).await
    }

    async fn continue_dialog(&self, outer: &DialogContext) -> DialogResult<DialogTurnResult> {
        let inner = self.inner_context(outer)?;
        let turn = inner.continue_dialog().await?;
        self.settle(outer, &inner, turn).await
    }

    async fn resume_dialog(
        &self,
        outer: &DialogContext,
        _reason: DialogReason,
        _result: Option<Value>,
    ) -> DialogResult<DialogTurnResult> {
        if let Some(active) = outer.active_dialog() {
            self.reprompt_dialog(outer.turn_context(), &active).await?;
        }
        Ok(DialogTurnResult::end_of_turn())
    }

    async fn reprompt_dialog(
        &self,
        ctx: &Arc<TurnContext>,
        instance: &DialogInstance,
    ) -> DialogResult<()> {
        self.detached_context(ctx, instance)?.reprompt_dialog().await
    }

    async fn end_dialog(
        &self,
        ctx: &Arc<TurnContext>,
        instance: &DialogInstance,
        reason: DialogReason,
    ) -> DialogResult<()> {
        if reason == DialogReason::CancelCalled {
            self.detached_context(ctx, instance)?
                .cancel_all_dialogs()
                .await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ComponentDialog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentDialog")
            .field("id", &self.id)
            .field("dialogs", &self.dialogs)
            .field("initial_dialog_id", &self.initial_dialog_id)
            .finish()
    }
}
