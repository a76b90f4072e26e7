//! Console Bot Example
//!
//! A small demonstration of the Colloquy framework that talks over stdin and
//! stdout. Every line typed is one turn.
//!
//! # Dialogs
//!
//! ```text
//! "onboarding" (waterfall)
//! ├── step 1: ask for a name, unless the user profile already has one
//! ├── step 2: remember the name, ask for a number between 1 and 10
//! └── step 3: reply and end; the next line starts over
//! ```
//!
//! The dialog stack and the user profile live in the storage selected by
//! the configuration, so with `storage.backend = "file"` a conversation can
//! be picked up again after a restart.
//!
//! # Commands
//!
//! - `/cancel`: drop the running dialogs
//! - `/quit`: exit
//!
//! # Usage
//!
//! ```bash
//! cargo run --package console-bot -- --config colloquy.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use colloquy::core::{BotCallback, ChannelAccount, ConversationAccount, ResourceResponse};
use colloquy::prelude::*;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(about = "Talk to a Colloquy bot on the console")]
struct Args {
    /// Configuration file to load instead of searching for one.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Configuration profile (development, production, test).
    #[arg(short, long)]
    profile: Option<String>,

    /// User id the console speaks as.
    #[arg(short, long, default_value = "console-user")]
    user: String,
}

// ============================================================================
// Console Channel
// ============================================================================

/// Prints everything the bot sends.
struct ConsoleAdapter;

#[async_trait]
impl BotAdapter for ConsoleAdapter {
    async fn send_activities(
        &self,
        _ctx: &TurnContext,
        activities: Vec<Activity>,
    ) -> BotResult<Vec<ResourceResponse>> {
        let mut out = tokio::io::stdout();
        let mut responses = Vec::with_capacity(activities.len());
        for activity in activities {
            if let Some(text) = activity.text.as_deref()
                && activity.is_type(ActivityType::Message)
            {
                out.write_all(format!("bot> {text}\n").as_bytes())
                    .await
                    .map_err(|e| BotError::transport(e.to_string()))?;
            }
            responses.push(ResourceResponse::new(activity.id.unwrap_or_default()));
        }
        out.flush()
            .await
            .map_err(|e| BotError::transport(e.to_string()))?;
        Ok(responses)
    }

    async fn update_activity(
        &self,
        _ctx: &TurnContext,
        activity: Activity,
    ) -> BotResult<ResourceResponse> {
        Err(BotError::transport(format!(
            "the console cannot edit activity {:?}",
            activity.id
        )))
    }

    async fn delete_activity(
        &self,
        _ctx: &TurnContext,
        reference: ConversationReference,
    ) -> BotResult<()> {
        Err(BotError::transport(format!(
            "the console cannot delete activity {:?}",
            reference.activity_id
        )))
    }
}

fn console_reference(user: &str) -> ConversationReference {
    ConversationReference {
        activity_id: None,
        user: ChannelAccount::new(user, user),
        bot: ChannelAccount::new("console-bot", "Console Bot"),
        conversation: ConversationAccount::new(format!("console-{user}")),
        channel_id: "console".to_string(),
        service_url: "console://local".to_string(),
        locale: None,
    }
}

// ============================================================================
// Dialogs
// ============================================================================

fn onboarding(profile_name: StatePropertyAccessor<String>) -> WaterfallDialog {
    let known = profile_name.clone();

    WaterfallDialog::new("onboarding")
        .step(move |step| {
            let known = known.clone();
            async move {
                if let Some(name) = known.get(step.turn_context()).await? {
                    return step.next(Some(Value::String(name))).await;
                }
                step.prompt("name", PromptOptions::new("Hi! What's your name?"))
                    .await
            }
        })
        .step(move |step| {
            let profile_name = profile_name.clone();
            async move {
                let name = step
                    .result()
                    .and_then(Value::as_str)
                    .unwrap_or("stranger")
                    .to_string();
                profile_name.set(step.turn_context(), &name).await?;
                step.set_value("name", Value::String(name.clone()))?;

                step.prompt(
                    "pick",
                    PromptOptions::new(format!("Nice to meet you, {name}. Pick a number from 1 to 10."))
                        .with_retry("Please pick a whole number from 1 to 10."),
                )
                .await
            }
        })
        .step(|step| async move {
            let name = step.value("name")?.unwrap_or_default();
            let pick = step.result().and_then(Value::as_f64).unwrap_or_default();
            step.turn_context()
                .send_text(format!(
                    "{} picked {pick}. Say anything to play again.",
                    name.as_str().unwrap_or("You")
                ))
                .await?;
            step.end_dialog(None).await
        })
}

fn pick_prompt() -> NumberPrompt {
    Prompt::number("pick").with_validator(|pc| async move {
        Ok(pc.recognized.succeeded
            && pc
                .recognized
                .value
                .is_some_and(|n| n.fract() == 0.0 && (1.0..=10.0).contains(&n)))
    })
}

/// Runs the dialogs, handling `/cancel` before they see the turn.
fn bot_logic(manager: DialogManager) -> BotCallback {
    into_callback(move |ctx: Arc<TurnContext>| {
        let manager = manager.clone();
        async move {
            if ctx.activity().text_or_empty().trim() == "/cancel" {
                let dc = manager.dialogs().create_context(Arc::clone(&ctx)).await?;
                dc.cancel_all_dialogs().await?;
                dc.save().await?;
                manager.conversation_state().save_changes(&ctx, false).await?;
                ctx.send_text("Cancelled.").await?;
                return Ok(());
            }

            manager.on_turn(ctx).await?;
            Ok(())
        }
    })
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut loader = ConfigLoader::new().with_current_dir().with_user_config_dir();
    if let Some(profile) = &args.profile {
        loader = loader.profile(profile.as_str());
    }
    if let Some(path) = &args.config {
        loader = loader.file(path);
    }
    let config = loader.load()?;

    let runtime = BotRuntime::builder()
        .config(config)
        .init_logging()
        .adapter(ConsoleAdapter)
        .use_middleware(ActivityLoggerMiddleware)
        .on_turn_error(|ctx, err| async move {
            error!(error = %err, "Turn failed");
            ctx.send_text("Sorry, something went wrong.").await?;
            Ok(())
        })
        .build()?;

    let conversation_state = BotState::conversation(runtime.storage().clone());
    let user_state = BotState::user(runtime.storage().clone());
    let profile_name = user_state.create_property::<String>("name");

    let manager = DialogManager::new(conversation_state, onboarding(profile_name))?
        .with_user_state(user_state)
        .add_dialog(TextPrompt::text("name"))?
        .add_dialog(pick_prompt())?;
    let bot = bot_logic(manager);

    let reference = console_reference(&args.user);
    info!(user = %args.user, "Console bot ready, type /quit to exit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if text == "/quit" {
            break;
        }

        let mut activity = Activity::message(text);
        activity.apply_conversation_reference(&reference, true);
        if let Err(err) = runtime.process_activity(activity, bot.clone()).await {
            error!(error = %err, retryable = err.is_retryable(), "Turn dropped");
        }
    }

    runtime.shutdown();
    Ok(())
}
