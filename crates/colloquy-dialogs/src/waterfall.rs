//! Step-by-step dialogs.
//!
//! A [`WaterfallDialog`] runs a fixed sequence of async steps. Each step
//! either waits for input (typically by starting a prompt), starts a child
//! dialog, skips ahead with [`WaterfallStepContext::next`], or ends the
//! dialog. When a child ends, the next step receives its result.
//!
//! The frame state of a waterfall looks like:
//!
//! ```text
//! {
//!   "options":    <begin options>,
//!   "values":     { ... step-shared values ... },
//!   "instanceId": "<uuid v4>",
//!   "stepIndex":  <index of the step that ran last>
//! }
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! let dialog = WaterfallDialog::new("greet")
//!     .step(|step| async move {
//!         step.prompt("name", PromptOptions::new("What's your name?")).await
//!     })
//!     .step(|step| async move {
//!         let name = step.result().and_then(|v| v.as_str()).unwrap_or("stranger").to_string();
//!         step.turn_context().send_text(format!("Hello, {name}!")).await?;
//!         step.end_dialog(None).await
//!     });
//! ```

use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;

use async_trait::async_trait;
use colloquy_core::ActivityType;
use futures::future::BoxFuture;
use serde_json::{Map, Value, json};
use tracing::trace;
use uuid::Uuid;

use crate::context::DialogContext;
use crate::dialog::Dialog;
use crate::error::DialogResult;
use crate::instance::{DialogReason, DialogTurnResult};

const KEY_OPTIONS: &str = "options";
const KEY_VALUES: &str = "values";
const KEY_INSTANCE_ID: &str = "instanceId";
const KEY_STEP_INDEX: &str = "stepIndex";

/// One type-erased waterfall step.
pub type WaterfallStep =
    Arc<dyn Fn(WaterfallStepContext) -> BoxFuture<'static, DialogResult<DialogTurnResult>> + Send + Sync>;

/// A dialog made of a sequence of steps.
#[derive(Clone)]
pub struct WaterfallDialog {
    id: String,
    steps: Arc<Vec<WaterfallStep>>,
}

impl WaterfallDialog {
    /// Creates a waterfall without steps.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            steps: Arc::new(Vec::new()),
        }
    }

    /// Appends a step.
    pub fn step<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(WaterfallStepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DialogResult<DialogTurnResult>> + Send + 'static,
    {
        Arc::make_mut(&mut self.steps).push(Arc::new(move |step: WaterfallStepContext| {
            Box::pin(f(step)) as BoxFuture<'static, DialogResult<DialogTurnResult>>
        }));
        self
    }

    /// Returns the number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns `true` if the waterfall has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    async fn run_step(
        &self,
        dc: &DialogContext,
        index: usize,
        reason: DialogReason,
        result: Option<Value>,
    ) -> DialogResult<DialogTurnResult> {
        let Some(step) = self.steps.get(index).cloned() else {
            return dc.end_dialog(result).await;
        };

        let options = dc.update_state(|state| {
            state.insert(KEY_STEP_INDEX.to_string(), json!(index));
            state.get(KEY_OPTIONS).cloned().filter(|o| !o.is_null())
        })?;
        trace!(dialog = %self.id, index, ?reason, "Running waterfall step");

        step(WaterfallStepContext {
            dc: dc.clone(),
            waterfall: self.clone(),
            depth: dc.stack_len().saturating_sub(1),
            index,
            reason,
            result,
            options,
        })
        .await
    }
}

#[async_trait]
impl Dialog for WaterfallDialog {
    fn id(&self) -> &str {
        &self.id
    }

    async fn begin_dialog(
        &self,
        dc: &DialogContext,
        options: Option<Value>,
    ) -> DialogResult<DialogTurnResult> {
        dc.update_state(|state| {
            state.insert(KEY_OPTIONS.to_string(), options.unwrap_or(Value::Null));
            state.insert(KEY_VALUES.to_string(), Value::Object(Map::new()));
            state.insert(
                KEY_INSTANCE_ID.to_string(),
                json!(Uuid::new_v4().to_string()),
            );
        })?;
        self.run_step(dc, 0, DialogReason::BeginCalled, None).await
    }

    async fn continue_dialog(&self, dc: &DialogContext) -> DialogResult<DialogTurnResult> {
        let activity = dc.turn_context().activity();
        if !activity.is_type(ActivityType::Message) {
            return Ok(DialogTurnResult::end_of_turn());
        }
        let text = json!(activity.text_or_empty());
        self.resume_dialog(dc, DialogReason::ContinueCalled, Some(text))
            .await
    }

    async fn resume_dialog(
        &self,
        dc: &DialogContext,
        reason: DialogReason,
        result: Option<Value>,
    ) -> DialogResult<DialogTurnResult> {
        let index = dc
            .state_value(KEY_STEP_INDEX)?
            .and_then(|v| v.as_u64())
            .unwrap_or_default() as usize;
        self.run_step(dc, index + 1, reason, result).await
    }
}

impl std::fmt::Debug for WaterfallDialog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaterfallDialog")
            .field("id", &self.id)
            .field("steps", &self.steps.len())
            .finish()
    }
}

// =============================================================================
// WaterfallStepContext
// =============================================================================

/// What a waterfall step sees.
///
/// Dereferences to the [`DialogContext`], so steps can begin, end or replace
/// dialogs directly.
pub struct WaterfallStepContext {
    dc: DialogContext,
    waterfall: WaterfallDialog,
    depth: usize,
    index: usize,
    reason: DialogReason,
    result: Option<Value>,
    options: Option<Value>,
}

impl WaterfallStepContext {
    /// Index of the running step.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Why the step runs.
    pub fn reason(&self) -> DialogReason {
        self.reason
    }

    /// The result of the previous step or child dialog, or the user's text
    /// when continued.
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// The options the waterfall was begun with.
    pub fn options(&self) -> Option<&Value> {
        self.options.as_ref()
    }

    /// Returns the dialog context.
    pub fn context(&self) -> &DialogContext {
        &self.dc
    }

    /// Returns the values shared by all steps of this waterfall.
    pub fn values(&self) -> DialogResult<Map<String, Value>> {
        let state = self.dc.frame_state(self.depth)?;
        Ok(match state.get(KEY_VALUES) {
            Some(Value::Object(values)) => values.clone(),
            _ => Map::new(),
        })
    }

    /// Returns one shared value.
    pub fn value(&self, key: &str) -> DialogResult<Option<Value>> {
        Ok(self.values()?.get(key).cloned())
    }

    /// Sets one shared value.
    pub fn set_value(&self, key: impl Into<String>, value: Value) -> DialogResult<()> {
        self.dc.update_frame(self.depth, |state| {
            let values = state
                .entry(KEY_VALUES)
                .or_insert_with(|| Value::Object(Map::new()));
            if !values.is_object() {
                *values = Value::Object(Map::new());
            }
            if let Value::Object(values) = values {
                values.insert(key.into(), value);
            }
        })
    }

    /// Skips to the next step, handing it `result`.
    pub async fn next(self, result: Option<Value>) -> DialogResult<DialogTurnResult> {
        self.waterfall
            .resume_dialog(&self.dc, DialogReason::NextCalled, result)
            .await
    }
}

impl Deref for WaterfallStepContext {
    type Target = DialogContext;

    fn deref(&self) -> &DialogContext {
        &self.dc
    }
}
