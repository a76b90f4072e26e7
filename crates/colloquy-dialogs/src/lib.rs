//! # Colloquy Dialogs
//!
//! A persisted dialog stack for multi-turn conversations.
//!
//! A conversation's dialogs form a stack of [`DialogInstance`] frames that is
//! saved in conversation state between turns. Each turn, the active (top)
//! dialog is continued; a dialog can start a child, wait for input, or end
//! and hand its result back to its parent.
//!
//! ```text
//!   turn n                    turn n+1
//! ┌──────────────┐          ┌──────────────┐
//! │ prompt "age" │◀─ top    │              │
//! ├──────────────┤          ├──────────────┤
//! │ waterfall    │          │ waterfall    │◀─ resumed with the answer
//! └──────────────┘          └──────────────┘
//! ```
//!
//! ## Building Blocks
//!
//! - **Dialogs**: the [`Dialog`] trait and the registry [`DialogSet`]
//! - **Stack operations**: begin, continue, end, replace and cancel on [`DialogContext`]
//! - **Ready-made dialogs**: [`WaterfallDialog`], [`ComponentDialog`], [`TextPrompt`], [`NumberPrompt`]
//! - **Turn driver**: [`DialogManager`] loads, runs and saves the stack
//!
//! ## Example
//!
//! ```rust,ignore
//! use colloquy_dialogs::prelude::*;
//!
//! let root = WaterfallDialog::new("root")
//!     .step(|step| async move {
//!         step.prompt("name", PromptOptions::new("What's your name?")).await
//!     })
//!     .step(|step| async move {
//!         let name = step.result().and_then(|v| v.as_str()).unwrap_or_default().to_string();
//!         step.turn_context().send_text(format!("Hi {name}")).await?;
//!         step.end_dialog(None).await
//!     });
//!
//! let manager = DialogManager::new(BotState::conversation(storage), root)?
//!     .add_dialog(TextPrompt::text("name"))?;
//! ```

pub mod component;
pub mod context;
pub mod dialog;
pub mod dialog_set;
pub mod error;
pub mod instance;
pub mod manager;
pub mod prompts;
pub mod waterfall;

pub use component::ComponentDialog;
pub use context::DialogContext;
pub use dialog::Dialog;
pub use dialog_set::DialogSet;
pub use error::{DialogError, DialogResult};
pub use instance::{
    DialogInstance, DialogReason, DialogState, DialogTurnResult, DialogTurnStatus,
};
pub use manager::{DIALOG_STATE_PROPERTY, DialogManager};
pub use prompts::{
    NumberPrompt, NumberRecognizer, Prompt, PromptOptions, PromptRecognizer,
    PromptRecognizerResult, PromptValidatorContext, TextPrompt, TextRecognizer,
};
pub use waterfall::{WaterfallDialog, WaterfallStep, WaterfallStepContext};

/// Prelude for common imports.
pub mod prelude {
    pub use super::{
        ComponentDialog, Dialog, DialogContext, DialogError, DialogManager, DialogReason,
        DialogResult, DialogSet, DialogTurnResult, DialogTurnStatus, NumberPrompt, Prompt,
        PromptOptions, TextPrompt, WaterfallDialog, WaterfallStepContext,
    };
}
