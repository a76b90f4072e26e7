//! The runtime view of a conversation's dialog stack.
//!
//! A [`DialogContext`] owns the stack for the duration of one turn. Stack
//! transitions are push (`begin_dialog`), pop (`end_dialog`) and
//! pop-then-push (`replace_dialog`); `cancel_all_dialogs` pops every frame.
//!
//! ```text
//!           begin_dialog("child", {x:1})
//! [parent] ─────────────────────────────► [parent, child]
//!                                               │ end_dialog({y:2})
//! [parent] ◄── parent.resume_dialog(EndCalled, {y:2})
//! ```
//!
//! The context is a cheap handle: clones share the same stack. The stack
//! lock is never held while a dialog hook runs.

use std::sync::Arc;

use colloquy_core::TurnContext;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::debug;

use crate::dialog::Dialog;
use crate::dialog_set::DialogSet;
use crate::error::{DialogError, DialogResult};
use crate::instance::{DialogInstance, DialogReason, DialogState, DialogTurnResult};

struct Inner {
    dialogs: Arc<DialogSet>,
    turn: Arc<TurnContext>,
    stack: Mutex<Vec<DialogInstance>>,
    parent: Option<DialogContext>,
}

/// The dialog stack of the current turn.
#[derive(Clone)]
pub struct DialogContext {
    inner: Arc<Inner>,
}

impl DialogContext {
    /// Creates a context over `state`.
    pub fn new(dialogs: Arc<DialogSet>, turn: Arc<TurnContext>, state: DialogState) -> Self {
        Self {
            inner: Arc::new(Inner {
                dialogs,
                turn,
                stack: Mutex::new(state.dialog_stack),
                parent: None,
            }),
        }
    }

    /// Creates a context nested in `parent`, as used by containers such as
    /// [`ComponentDialog`](crate::ComponentDialog). Ids not found in
    /// `dialogs` are resolved through the parent.
    pub fn with_parent(dialogs: Arc<DialogSet>, parent: &DialogContext, state: DialogState) -> Self {
        Self {
            inner: Arc::new(Inner {
                dialogs,
                turn: Arc::clone(&parent.inner.turn),
                stack: Mutex::new(state.dialog_stack),
                parent: Some(parent.clone()),
            }),
        }
    }

    // ─── Accessors ────────────────────────────────────────────────────────────

    /// Returns the turn this context belongs to.
    pub fn turn_context(&self) -> &Arc<TurnContext> {
        &self.inner.turn
    }

    /// Returns the dialogs this context resolves ids against first.
    pub fn dialogs(&self) -> &Arc<DialogSet> {
        &self.inner.dialogs
    }

    /// Returns the enclosing context, if nested.
    pub fn parent(&self) -> Option<&DialogContext> {
        self.inner.parent.as_ref()
    }

    /// Returns a snapshot of the stack, bottom first.
    pub fn stack(&self) -> Vec<DialogInstance> {
        self.inner.stack.lock().clone()
    }

    /// Returns the number of frames on the stack.
    pub fn stack_len(&self) -> usize {
        self.inner.stack.lock().len()
    }

    /// Returns a snapshot of the stack in its persisted shape.
    pub fn dialog_state(&self) -> DialogState {
        DialogState {
            dialog_stack: self.stack(),
        }
    }

    /// Returns a snapshot of the top frame.
    pub fn active_dialog(&self) -> Option<DialogInstance> {
        self.inner.stack.lock().last().cloned()
    }

    /// Resolves `id` in this context's set, then in its ancestors.
    pub fn find_dialog(&self, id: &str) -> Option<Arc<dyn Dialog>> {
        self.inner
            .dialogs
            .find(id)
            .or_else(|| self.parent().and_then(|p| p.find_dialog(id)))
    }

    fn resolve(&self, id: &str) -> DialogResult<Arc<dyn Dialog>> {
        self.find_dialog(id).ok_or_else(|| DialogError::not_found(id))
    }

    // ─── Active frame state ───────────────────────────────────────────────────

    /// Returns a copy of the active frame's state.
    pub fn state(&self) -> DialogResult<Map<String, Value>> {
        self.inner
            .stack
            .lock()
            .last()
            .map(|frame| frame.state.clone())
            .ok_or(DialogError::NoActiveDialog)
    }

    /// Mutates the active frame's state.
    pub fn update_state<R>(&self, f: impl FnOnce(&mut Map<String, Value>) -> R) -> DialogResult<R> {
        let mut stack = self.inner.stack.lock();
        let frame = stack.last_mut().ok_or(DialogError::NoActiveDialog)?;
        Ok(f(&mut frame.state))
    }

    /// Returns one value of the active frame's state.
    pub fn state_value(&self, key: &str) -> DialogResult<Option<Value>> {
        Ok(self.state()?.get(key).cloned())
    }

    /// Sets one value of the active frame's state.
    pub fn set_state_value(&self, key: impl Into<String>, value: Value) -> DialogResult<()> {
        self.update_state(|state| {
            state.insert(key.into(), value);
        })
    }

    pub(crate) fn frame_state(&self, depth: usize) -> DialogResult<Map<String, Value>> {
        self.inner
            .stack
            .lock()
            .get(depth)
            .map(|frame| frame.state.clone())
            .ok_or(DialogError::NoActiveDialog)
    }

    pub(crate) fn update_frame<R>(
        &self,
        depth: usize,
        f: impl FnOnce(&mut Map<String, Value>) -> R,
    ) -> DialogResult<R> {
        let mut stack = self.inner.stack.lock();
        let frame = stack.get_mut(depth).ok_or(DialogError::NoActiveDialog)?;
        Ok(f(&mut frame.state))
    }

    // ─── Stack operations ─────────────────────────────────────────────────────

    /// Pushes a frame for `id` and starts the dialog with `options`.
    pub async fn begin_dialog(
        &self,
        id: &str,
        options: Option<Value>,
    ) -> DialogResult<DialogTurnResult> {
        let dialog = self.resolve(id)?;

        let depth = {
            let mut stack = self.inner.stack.lock();
            stack.push(DialogInstance::new(id));
            stack.len()
        };
        debug!(dialog = id, depth, "Begin dialog");

        dialog.begin_dialog(self, options).await
    }

    /// Continues the active dialog with the current inbound activity.
    ///
    /// An empty stack is a normal outcome: the result is `Complete` with no
    /// value and no dialog logic runs.
    pub async fn continue_dialog(&self) -> DialogResult<DialogTurnResult> {
        let Some(active) = self.active_dialog() else {
            return Ok(DialogTurnResult::complete(None));
        };

        let dialog = self.resolve(&active.id)?;
        debug!(dialog = %active.id, "Continue dialog");
        dialog.continue_dialog(self).await
    }

    /// Pops the active dialog and delivers `result` to the dialog beneath it.
    ///
    /// With no dialog beneath, `result` becomes the turn's `Complete` result.
    pub async fn end_dialog(&self, result: Option<Value>) -> DialogResult<DialogTurnResult> {
        self.end_active_dialog(DialogReason::EndCalled).await?;

        let Some(parent) = self.active_dialog() else {
            return Ok(DialogTurnResult::complete(result));
        };

        let dialog = self.resolve(&parent.id)?;
        debug!(dialog = %parent.id, "Resume dialog");
        let mut turn = dialog
            .resume_dialog(self, DialogReason::EndCalled, result)
            .await?;
        turn.parent_ended = turn.is_finished();
        Ok(turn)
    }

    /// Ends the active dialog without returning to its parent and starts
    /// `id` at the same depth. The replaced dialog's result is discarded.
    pub async fn replace_dialog(
        &self,
        id: &str,
        options: Option<Value>,
    ) -> DialogResult<DialogTurnResult> {
        self.resolve(id)?;
        self.end_active_dialog(DialogReason::ReplaceCalled).await?;
        self.begin_dialog(id, options).await
    }

    /// Pops every frame, calling only each dialog's `end_dialog` hook with
    /// [`DialogReason::CancelCalled`].
    ///
    /// Returns `Cancelled` if anything was popped, `Complete` on an empty
    /// stack.
    pub async fn cancel_all_dialogs(&self) -> DialogResult<DialogTurnResult> {
        if self.stack_len() == 0 {
            return Ok(DialogTurnResult::complete(None));
        }

        while self.stack_len() > 0 {
            self.end_active_dialog(DialogReason::CancelCalled).await?;
        }
        debug!("Cancelled all dialogs");
        Ok(DialogTurnResult::cancelled())
    }

    /// Asks the active dialog to repeat its prompt.
    pub async fn reprompt_dialog(&self) -> DialogResult<()> {
        let Some(active) = self.active_dialog() else {
            return Ok(());
        };
        let dialog = self.resolve(&active.id)?;
        dialog.reprompt_dialog(self.turn_context(), &active).await
    }

    /// Writes the stack back through the set's state accessor.
    ///
    /// Only stages the value in the turn's state cache; the owning
    /// [`BotState`](colloquy_core::BotState) persists it on `save_changes`.
    pub async fn save(&self) -> DialogResult<()> {
        let accessor = self
            .inner
            .dialogs
            .state_accessor()
            .ok_or(DialogError::MissingState)?;
        accessor.set(&self.inner.turn, &self.dialog_state()).await?;
        Ok(())
    }

    async fn end_active_dialog(&self, reason: DialogReason) -> DialogResult<()> {
        let Some(active) = self.active_dialog() else {
            return Ok(());
        };

        if let Some(dialog) = self.find_dialog(&active.id) {
            dialog
                .end_dialog(self.turn_context(), &active, reason)
                .await?;
        }

        let popped = self.inner.stack.lock().pop();
        debug!(
            dialog = popped.as_ref().map(|f| f.id.as_str()).unwrap_or_default(),
            ?reason,
            "End dialog"
        );
        Ok(())
    }
}

impl std::fmt::Debug for DialogContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<String> = self.stack().into_iter().map(|frame| frame.id).collect();
        f.debug_struct("DialogContext")
            .field("stack", &ids)
            .field("nested", &self.inner.parent.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::DialogTurnStatus;
    use async_trait::async_trait;
    use colloquy_runtime::testing::TestAdapter;
    use serde_json::json;

    type Log = Arc<Mutex<Vec<String>>>;

    /// Begins `child` with `{x:1}` and records what it is resumed with.
    struct Parent {
        log: Log,
        end_after_resume: bool,
    }

    #[async_trait]
    impl Dialog for Parent {
        fn id(&self) -> &str {
            "parent"
        }

        async fn begin_dialog(
            &self,
            dc: &DialogContext,
            _options: Option<Value>,
        ) -> DialogResult<DialogTurnResult> {
            dc.begin_dialog("child", Some(json!({"x": 1}))).await
        }

        async fn resume_dialog(
            &self,
            dc: &DialogContext,
            reason: DialogReason,
            result: Option<Value>,
        ) -> DialogResult<DialogTurnResult> {
            self.log
                .lock()
                .push(format!("resume {reason:?} {}", result.clone().unwrap_or_default()));
            if self.end_after_resume {
                dc.end_dialog(result).await
            } else {
                Ok(DialogTurnResult::end_of_turn())
            }
        }
    }

    /// Ends immediately with `{y: options.x + 1}`.
    struct Child {
        log: Log,
    }

    #[async_trait]
    impl Dialog for Child {
        fn id(&self) -> &str {
            "child"
        }

        async fn begin_dialog(
            &self,
            dc: &DialogContext,
            options: Option<Value>,
        ) -> DialogResult<DialogTurnResult> {
            let x = options.as_ref().and_then(|o| o["x"].as_i64()).unwrap_or_default();
            self.log.lock().push(format!("child options x={x}"));
            dc.end_dialog(Some(json!({"y": x + 1}))).await
        }

        async fn end_dialog(
            &self,
            _ctx: &Arc<TurnContext>,
            instance: &DialogInstance,
            reason: DialogReason,
        ) -> DialogResult<()> {
            self.log.lock().push(format!("end {} {reason:?}", instance.id));
            Ok(())
        }
    }

    /// Waits until continued, then ends with the inbound text.
    struct Echo;

    #[async_trait]
    impl Dialog for Echo {
        fn id(&self) -> &str {
            "echo"
        }

        async fn begin_dialog(
            &self,
            dc: &DialogContext,
            _options: Option<Value>,
        ) -> DialogResult<DialogTurnResult> {
            dc.set_state_value("started", json!(true))?;
            Ok(DialogTurnResult::end_of_turn())
        }

        async fn continue_dialog(&self, dc: &DialogContext) -> DialogResult<DialogTurnResult> {
            let text = dc.turn_context().activity().text_or_empty().to_string();
            dc.end_dialog(Some(json!(text))).await
        }
    }

    fn set(log: &Log, end_after_resume: bool) -> Arc<DialogSet> {
        let mut dialogs = DialogSet::new();
        dialogs
            .add(Parent {
                log: Arc::clone(log),
                end_after_resume,
            })
            .unwrap()
            .add(Child {
                log: Arc::clone(log),
            })
            .unwrap()
            .add(Echo)
            .unwrap();
        Arc::new(dialogs)
    }

    fn context(dialogs: &Arc<DialogSet>, text: &str) -> DialogContext {
        let adapter = TestAdapter::new();
        dialogs.create_context_from_state(adapter.context(text), DialogState::new())
    }

    #[tokio::test]
    async fn test_child_result_reaches_parent() {
        let log = Log::default();
        let dialogs = set(&log, false);
        let dc = context(&dialogs, "hi");

        let result = dc.begin_dialog("parent", None).await.unwrap();

        assert_eq!(result, DialogTurnResult::end_of_turn());
        assert_eq!(
            *log.lock(),
            [
                "child options x=1",
                "end child EndCalled",
                r#"resume EndCalled {"y":2}"#
            ]
        );
        let ids: Vec<_> = dc.stack().into_iter().map(|f| f.id).collect();
        assert_eq!(ids, ["parent"]);
    }

    #[tokio::test]
    async fn test_parent_ending_empties_stack() {
        let log = Log::default();
        let dialogs = set(&log, true);
        let dc = context(&dialogs, "hi");

        let result = dc.begin_dialog("parent", None).await.unwrap();

        assert_eq!(result.status, DialogTurnStatus::Complete);
        assert_eq!(result.result, Some(json!({"y": 2})));
        assert!(result.parent_ended);
        assert_eq!(dc.stack_len(), 0);
    }

    #[tokio::test]
    async fn test_begin_then_end_without_parent_completes() {
        let log = Log::default();
        let dialogs = set(&log, false);
        let dc = context(&dialogs, "hi");

        let result = dc.begin_dialog("child", Some(json!({"x": 41}))).await.unwrap();
        assert_eq!(result, DialogTurnResult::complete(Some(json!({"y": 42}))));
        assert!(!result.parent_ended);
    }

    #[tokio::test]
    async fn test_continue_on_empty_stack() {
        let log = Log::default();
        let dialogs = set(&log, false);
        let dc = context(&dialogs, "hi");

        let result = dc.continue_dialog().await.unwrap();
        assert_eq!(result, DialogTurnResult::complete(None));
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_wait_then_continue() {
        let dialogs = set(&Log::default(), false);
        let dc = context(&dialogs, "first");
        assert_eq!(
            dc.begin_dialog("echo", None).await.unwrap().status,
            DialogTurnStatus::Waiting
        );
        assert_eq!(dc.state_value("started").unwrap(), Some(json!(true)));

        let next = context(&dialogs, "second");
        let next = dialogs.create_context_from_state(Arc::clone(next.turn_context()), dc.dialog_state());
        let result = next.continue_dialog().await.unwrap();
        assert_eq!(result, DialogTurnResult::complete(Some(json!("second"))));
    }

    #[tokio::test]
    async fn test_unknown_dialog_leaves_stack_untouched() {
        let dialogs = set(&Log::default(), false);
        let dc = context(&dialogs, "hi");
        dc.begin_dialog("echo", None).await.unwrap();

        let err = dc.begin_dialog("nope", None).await.unwrap_err();
        assert!(matches!(err, DialogError::DialogNotFound { ref id } if id == "nope"));

        let err = dc.replace_dialog("nope", None).await.unwrap_err();
        assert!(matches!(err, DialogError::DialogNotFound { .. }));
        assert_eq!(dc.stack_len(), 1);
    }

    #[tokio::test]
    async fn test_replace_discards_result() {
        let log = Log::default();
        let dialogs = set(&log, false);
        let dc = context(&dialogs, "hi");
        dc.begin_dialog("echo", None).await.unwrap();
        dc.begin_dialog("echo", None).await.unwrap();

        let result = dc.replace_dialog("echo", None).await.unwrap();
        assert_eq!(result.status, DialogTurnStatus::Waiting);
        assert_eq!(dc.stack_len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_all_is_idempotent() {
        let log = Log::default();
        let dialogs = set(&log, false);
        let dc = context(&dialogs, "hi");
        dc.begin_dialog("echo", None).await.unwrap();
        dc.begin_dialog("echo", None).await.unwrap();

        let first = dc.cancel_all_dialogs().await.unwrap();
        assert_eq!(first.status, DialogTurnStatus::Cancelled);
        assert_eq!(dc.stack_len(), 0);

        let second = dc.cancel_all_dialogs().await.unwrap();
        assert_eq!(second, DialogTurnResult::complete(None));
    }

    #[tokio::test]
    async fn test_cancel_calls_only_end_hooks() {
        let log = Log::default();
        let dialogs = set(&log, false);
        let dc = context(&dialogs, "hi");
        {
            let mut stack = dc.inner.stack.lock();
            stack.push(DialogInstance::new("parent"));
            stack.push(DialogInstance::new("child"));
        }

        dc.cancel_all_dialogs().await.unwrap();
        assert_eq!(*log.lock(), ["end child CancelCalled"]);
    }

    #[tokio::test]
    async fn test_frame_state_is_private() {
        let dialogs = set(&Log::default(), false);
        let dc = context(&dialogs, "hi");
        dc.begin_dialog("echo", None).await.unwrap();
        dc.set_state_value("k", json!("bottom")).unwrap();
        dc.begin_dialog("echo", None).await.unwrap();

        assert_eq!(dc.state_value("k").unwrap(), None);
        assert_eq!(dc.frame_state(0).unwrap()["k"], json!("bottom"));
    }
}
