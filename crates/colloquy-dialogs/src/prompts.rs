//! Prompts: dialogs that ask a question and wait for a valid answer.
//!
//! A [`Prompt`] sends its prompt activity on begin, then on each following
//! message runs its [`PromptRecognizer`] and optional validator. A valid
//! answer ends the prompt with the recognized value; an invalid one re-sends
//! the retry prompt (unless something was already sent this turn) and waits
//! again.
//!
//! Frame state:
//!
//! ```text
//! { "options": <PromptOptions>, "state": { "attemptCount": <n> } }
//! ```

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use colloquy_core::{Activity, ActivityType, TurnContext};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::context::DialogContext;
use crate::dialog::Dialog;
use crate::error::{DialogError, DialogResult};
use crate::instance::{DialogInstance, DialogReason, DialogTurnResult};

const KEY_OPTIONS: &str = "options";
const KEY_STATE: &str = "state";
const KEY_ATTEMPT_COUNT: &str = "attemptCount";

/// What a prompt sends.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptOptions {
    /// Sent when the prompt begins or is re-prompted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<Activity>,
    /// Sent after an invalid answer. Falls back to `prompt`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_prompt: Option<Activity>,
    /// Free-form data for validators.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validations: Option<Value>,
}

impl PromptOptions {
    /// Creates options with a text prompt.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(Activity::message(prompt)),
            ..Self::default()
        }
    }

    /// Sets a text retry prompt.
    pub fn with_retry(mut self, retry: impl Into<String>) -> Self {
        self.retry_prompt = Some(Activity::message(retry));
        self
    }

    /// Attaches validator data.
    pub fn with_validations(mut self, validations: Value) -> Self {
        self.validations = Some(validations);
        self
    }
}

/// Outcome of recognizing one answer.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptRecognizerResult<T> {
    /// Whether a value was recognized.
    pub succeeded: bool,
    /// The recognized value.
    pub value: Option<T>,
}

impl<T> PromptRecognizerResult<T> {
    /// A successful recognition.
    pub fn success(value: T) -> Self {
        Self {
            succeeded: true,
            value: Some(value),
        }
    }

    /// A failed recognition.
    pub fn failure() -> Self {
        Self {
            succeeded: false,
            value: None,
        }
    }
}

/// Turns the inbound activity into a typed answer.
#[async_trait]
pub trait PromptRecognizer: Send + Sync + 'static {
    /// The recognized type.
    type Output: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;

    /// Recognizes the current activity.
    async fn recognize(
        &self,
        ctx: &Arc<TurnContext>,
        options: &PromptOptions,
    ) -> DialogResult<PromptRecognizerResult<Self::Output>>;
}

/// Accepts any non-empty message text.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextRecognizer;

#[async_trait]
impl PromptRecognizer for TextRecognizer {
    type Output = String;

    async fn recognize(
        &self,
        ctx: &Arc<TurnContext>,
        _options: &PromptOptions,
    ) -> DialogResult<PromptRecognizerResult<String>> {
        let text = ctx.activity().text_or_empty();
        Ok(if text.is_empty() {
            PromptRecognizerResult::failure()
        } else {
            PromptRecognizerResult::success(text.to_string())
        })
    }
}

/// Accepts a message that parses as a number.
#[derive(Debug, Clone, Copy, Default)]
pub struct NumberRecognizer;

#[async_trait]
impl PromptRecognizer for NumberRecognizer {
    type Output = f64;

    async fn recognize(
        &self,
        ctx: &Arc<TurnContext>,
        _options: &PromptOptions,
    ) -> DialogResult<PromptRecognizerResult<f64>> {
        let text = ctx.activity().text_or_empty().trim().replace(',', "");
        Ok(match text.parse::<f64>() {
            Ok(n) if n.is_finite() => PromptRecognizerResult::success(n),
            _ => PromptRecognizerResult::failure(),
        })
    }
}

/// What a validator sees.
#[derive(Debug, Clone)]
pub struct PromptValidatorContext<T> {
    /// The current turn.
    pub turn: Arc<TurnContext>,
    /// What the recognizer produced.
    pub recognized: PromptRecognizerResult<T>,
    /// The prompt's options.
    pub options: PromptOptions,
    /// Number of answers received so far, including this one.
    pub attempt_count: u64,
}

type Validator<T> =
    Arc<dyn Fn(PromptValidatorContext<T>) -> BoxFuture<'static, DialogResult<bool>> + Send + Sync>;

// =============================================================================
// Prompt
// =============================================================================

/// A prompt dialog generic over its recognizer.
pub struct Prompt<R: PromptRecognizer> {
    id: String,
    recognizer: R,
    validator: Option<Validator<R::Output>>,
}

/// A prompt for free text.
pub type TextPrompt = Prompt<TextRecognizer>;

/// A prompt for a number.
pub type NumberPrompt = Prompt<NumberRecognizer>;

impl Prompt<TextRecognizer> {
    /// Creates a text prompt.
    pub fn text(id: impl Into<String>) -> Self {
        Self::new(id, TextRecognizer)
    }
}

impl Prompt<NumberRecognizer> {
    /// Creates a number prompt.
    pub fn number(id: impl Into<String>) -> Self {
        Self::new(id, NumberRecognizer)
    }
}

impl<R: PromptRecognizer> Prompt<R> {
    /// Creates a prompt with a custom recognizer.
    pub fn new(id: impl Into<String>, recognizer: R) -> Self {
        Self {
            id: id.into(),
            recognizer,
            validator: None,
        }
    }

    /// Adds a validator run after successful or failed recognition.
    ///
    /// Without a validator an answer is valid iff recognition succeeded.
    pub fn with_validator<F, Fut>(mut self, validator: F) -> Self
    where
        F: Fn(PromptValidatorContext<R::Output>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DialogResult<bool>> + Send + 'static,
    {
        self.validator = Some(Arc::new(move |pc: PromptValidatorContext<R::Output>| {
            Box::pin(validator(pc)) as BoxFuture<'static, DialogResult<bool>>
        }));
        self
    }

    fn options_from(state: &Map<String, Value>) -> DialogResult<PromptOptions> {
        let value = state.get(KEY_OPTIONS).cloned().unwrap_or(Value::Null);
        Ok(serde_json::from_value(value)?)
    }

    async fn on_prompt(
        &self,
        ctx: &Arc<TurnContext>,
        options: &PromptOptions,
        is_retry: bool,
    ) -> DialogResult<()> {
        let activity = if is_retry {
            options.retry_prompt.as_ref().or(options.prompt.as_ref())
        } else {
            options.prompt.as_ref()
        };
        if let Some(activity) = activity {
            ctx.send_activity(activity.clone()).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<R: PromptRecognizer> Dialog for Prompt<R> {
    fn id(&self) -> &str {
        &self.id
    }

    async fn begin_dialog(
        &self,
        dc: &DialogContext,
        options: Option<Value>,
    ) -> DialogResult<DialogTurnResult> {
        let options: PromptOptions = match options {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| DialogError::InvalidOptions(e.to_string()))?,
            None => {
                return Err(DialogError::InvalidOptions(format!(
                    "prompt '{}' requires PromptOptions",
                    self.id
                )));
            }
        };

        let stored = serde_json::to_value(&options)?;
        dc.update_state(|state| {
            state.insert(KEY_OPTIONS.to_string(), stored);
            state.insert(KEY_STATE.to_string(), json!({ KEY_ATTEMPT_COUNT: 0 }));
        })?;

        self.on_prompt(dc.turn_context(), &options, false).await?;
        Ok(DialogTurnResult::end_of_turn())
    }

    async fn continue_dialog(&self, dc: &DialogContext) -> DialogResult<DialogTurnResult> {
        let ctx = dc.turn_context();
        if !ctx.activity().is_type(ActivityType::Message) {
            return Ok(DialogTurnResult::end_of_turn());
        }

        let options = Self::options_from(&dc.state()?)?;
        let recognized = self.recognizer.recognize(ctx, &options).await?;

        let attempt_count = dc.update_state(|state| {
            let count = state
                .get(KEY_STATE)
                .and_then(|s| s.get(KEY_ATTEMPT_COUNT))
                .and_then(Value::as_u64)
                .unwrap_or_default()
                + 1;
            state.insert(KEY_STATE.to_string(), json!({ KEY_ATTEMPT_COUNT: count }));
            count
        })?;

        let valid = match &self.validator {
            Some(validator) => {
                validator(PromptValidatorContext {
                    turn: Arc::clone(ctx),
                    recognized: recognized.clone(),
                    options: options.clone(),
                    attempt_count,
                })
                .await?
            }
            None => recognized.succeeded,
        };

        if valid {
            let value = recognized.value.map(serde_json::to_value).transpose()?;
            return dc.end_dialog(value).await;
        }

        debug!(prompt = %self.id, attempt_count, "Prompt answer rejected");
        if !ctx.responded() {
            self.on_prompt(ctx, &options, true).await?;
        }
        Ok(DialogTurnResult::end_of_turn())
    }

    async fn resume_dialog(
        &self,
        dc: &DialogContext,
        _reason: DialogReason,
        _result: Option<Value>,
    ) -> DialogResult<DialogTurnResult> {
        if let Some(active) = dc.active_dialog() {
            self.reprompt_dialog(dc.turn_context(), &active).await?;
        }
        Ok(DialogTurnResult::end_of_turn())
    }

    async fn reprompt_dialog(
        &self,
        ctx: &Arc<TurnContext>,
        instance: &DialogInstance,
    ) -> DialogResult<()> {
        let options = Self::options_from(&instance.state)?;
        self.on_prompt(ctx, &options, false).await
    }
}

impl<R: PromptRecognizer> std::fmt::Debug for Prompt<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prompt")
            .field("id", &self.id)
            .field("validated", &self.validator.is_some())
            .finish()
    }
}

impl DialogContext {
    /// Begins the prompt `id` with `options`.
    pub async fn prompt(&self, id: &str, options: PromptOptions) -> DialogResult<DialogTurnResult> {
        let options = serde_json::to_value(options)?;
        self.begin_dialog(id, Some(options)).await
    }
}
