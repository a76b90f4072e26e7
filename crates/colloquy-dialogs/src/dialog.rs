//! The [`Dialog`] trait.
//!
//! A dialog is a resumable unit of conversational logic. It never holds a
//! live call stack between turns; instead the engine keeps an explicit stack
//! of [`DialogInstance`] frames and dispatches each new turn back into the
//! dialog that owns the top frame.
//!
//! ```text
//! begin_dialog ──► Waiting ──(next turn)──► continue_dialog ──► …
//!      │                                          │
//!      └──► begins a child ──(child ends)──► resume_dialog(EndCalled, result)
//! ```
//!
//! Every hook returns a [`DialogTurnResult`]; `Waiting` is produced by
//! returning [`DialogTurnResult::end_of_turn`], never by raising an error.

use std::sync::Arc;

use async_trait::async_trait;
use colloquy_core::TurnContext;
use serde_json::Value;

use crate::context::DialogContext;
use crate::error::DialogResult;
use crate::instance::{DialogInstance, DialogReason, DialogTurnResult};

/// A resumable unit of conversational logic.
#[async_trait]
pub trait Dialog: Send + Sync + 'static {
    /// The id the dialog is registered under.
    fn id(&self) -> &str;

    /// Called when the dialog is pushed onto the stack.
    ///
    /// The new frame is already the active dialog of `dc`.
    async fn begin_dialog(
        &self,
        dc: &DialogContext,
        options: Option<Value>,
    ) -> DialogResult<DialogTurnResult>;

    /// Called with each new inbound activity while the dialog is on top.
    ///
    /// Ends the dialog by default.
    async fn continue_dialog(&self, dc: &DialogContext) -> DialogResult<DialogTurnResult> {
        dc.end_dialog(None).await
    }

    /// Called when a child dialog ended and this dialog is on top again.
    ///
    /// Ends the dialog with the child's result by default.
    async fn resume_dialog(
        &self,
        dc: &DialogContext,
        _reason: DialogReason,
        result: Option<Value>,
    ) -> DialogResult<DialogTurnResult> {
        dc.end_dialog(result).await
    }

    /// Asks the dialog to repeat its last prompt.
    async fn reprompt_dialog(
        &self,
        _ctx: &Arc<TurnContext>,
        _instance: &DialogInstance,
    ) -> DialogResult<()> {
        Ok(())
    }

    /// Called just before the dialog's frame is popped.
    async fn end_dialog(
        &self,
        _ctx: &Arc<TurnContext>,
        _instance: &DialogInstance,
        _reason: DialogReason,
    ) -> DialogResult<()> {
        Ok(())
    }
}
