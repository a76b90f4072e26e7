//! Full turns through `BotRuntime` and the test channel.

use std::sync::Arc;
use std::time::Duration;

use colloquy_core::{
    AutoSaveStateMiddleware, BotCallback, BotError, BotState, BoxedStorage, CatchErrorMiddleware,
    ConversationAccount, MemoryStorage, Next, StorageError, TurnContext, into_callback, middleware_fn,
};
use colloquy_runtime::config::{ColloquyConfig, StorageBackend};
use colloquy_runtime::storage::open_storage;
use colloquy_runtime::testing::TestAdapter;
use colloquy_runtime::{BotRuntime, RuntimeError};
use parking_lot::Mutex;
use tokio::sync::Notify;

type Log = Arc<Mutex<Vec<String>>>;

fn tracer(name: &'static str, log: &Log) -> colloquy_core::MiddlewareFn {
    let log = Arc::clone(log);
    middleware_fn(move |_ctx, next: Next| {
        let log = Arc::clone(&log);
        async move {
            log.lock().push(format!("enter {name}"));
            next.run().await?;
            log.lock().push(format!("exit {name}"));
            Ok(())
        }
    })
    .named(name)
}

/// Increments a conversation counter, pausing between load and save.
fn slow_counter(state: &BotState, log: &Log) -> BotCallback {
    let counter = state.create_property::<u32>("count");
    let log = Arc::clone(log);
    into_callback(move |ctx: Arc<TurnContext>| {
        let counter = counter.clone();
        let log = Arc::clone(&log);
        async move {
            let tag = ctx.activity().text_or_empty().to_string();
            log.lock().push(format!("start {tag}"));
            let count = counter.get_or_insert_with(&ctx, || 0).await?;
            tokio::time::sleep(Duration::from_millis(30)).await;
            counter.set(&ctx, &(count + 1)).await?;
            log.lock().push(format!("end {tag}"));
            Ok(())
        }
    })
}

async fn read_count(runtime: &BotRuntime, adapter: &Arc<TestAdapter>, state: &BotState) -> u32 {
    let counter = state.create_property::<u32>("count");
    let seen = Arc::new(Mutex::new(None));
    let out = Arc::clone(&seen);
    let callback = into_callback(move |ctx: Arc<TurnContext>| {
        let counter = counter.clone();
        let out = Arc::clone(&out);
        async move {
            *out.lock() = counter.get(&ctx).await?;
            Ok(())
        }
    });
    runtime
        .process_activity(adapter.make_activity("read"), callback)
        .await
        .unwrap();
    let count = seen.lock().unwrap_or_default();
    count
}

#[tokio::test]
async fn test_middleware_nests_around_bot_logic() {
    let adapter = TestAdapter::new();
    let log: Log = Arc::default();

    let runtime = BotRuntime::builder()
        .adapter_arc(adapter.clone())
        .use_middleware(tracer("A", &log))
        .use_middleware(tracer("B", &log))
        .build()
        .unwrap();

    let bot_log = Arc::clone(&log);
    let bot = into_callback(move |_ctx: Arc<TurnContext>| {
        let log = Arc::clone(&bot_log);
        async move {
            log.lock().push("bot".to_string());
            Ok(())
        }
    });

    assert!(runtime.process_activity(adapter.make_activity("hi"), bot).await.unwrap());
    assert_eq!(*log.lock(), ["enter A", "enter B", "bot", "exit B", "exit A"]);
}

#[tokio::test]
async fn test_same_conversation_turns_are_serialized() {
    let adapter = TestAdapter::new();
    let storage: BoxedStorage = Arc::new(MemoryStorage::new());
    let state = BotState::conversation(storage.clone());
    let runtime = BotRuntime::builder()
        .adapter_arc(adapter.clone())
        .storage(storage)
        .use_middleware(AutoSaveStateMiddleware::new([state.clone()]))
        .build()
        .unwrap();

    let log: Log = Arc::default();
    let (a, b) = tokio::join!(
        runtime.process_activity(adapter.make_activity("a"), slow_counter(&state, &log)),
        runtime.process_activity(adapter.make_activity("b"), slow_counter(&state, &log)),
    );
    a.unwrap();
    b.unwrap();

    assert_eq!(*log.lock(), ["start a", "end a", "start b", "end b"]);
    assert_eq!(read_count(&runtime, &adapter, &state).await, 2);
}

#[tokio::test]
async fn test_unserialized_turns_hit_stale_write() {
    let adapter = TestAdapter::new();
    let storage: BoxedStorage = Arc::new(MemoryStorage::new());
    let state = BotState::conversation(storage.clone());

    let runtime = BotRuntime::builder()
        .adapter_arc(adapter.clone())
        .storage(storage)
        .serialize_turns(false)
        .use_middleware(AutoSaveStateMiddleware::new([state.clone()]))
        .build()
        .unwrap();

    let log: Log = Arc::default();
    runtime
        .process_activity(adapter.make_activity("seed"), slow_counter(&state, &log))
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        runtime.process_activity(adapter.make_activity("a"), slow_counter(&state, &log)),
        runtime.process_activity(adapter.make_activity("b"), slow_counter(&state, &log)),
    );

    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let err = results.into_iter().find_map(Result::err).unwrap();
    assert!(err.is_retryable());
    assert!(matches!(
        err,
        RuntimeError::Turn(BotError::Storage(StorageError::ETagConflict { .. }))
    ));
    assert_eq!(read_count(&runtime, &adapter, &state).await, 2);
}

#[tokio::test]
async fn test_different_conversations_run_concurrently() {
    let adapter = TestAdapter::new();
    let runtime = BotRuntime::builder()
        .adapter_arc(adapter.clone())
        .build()
        .unwrap();

    let gate = Arc::new(Notify::new());
    let waiting = {
        let gate = Arc::clone(&gate);
        into_callback(move |_ctx: Arc<TurnContext>| {
            let gate = Arc::clone(&gate);
            async move {
                gate.notified().await;
                Ok(())
            }
        })
    };
    let releasing = {
        let gate = Arc::clone(&gate);
        into_callback(move |_ctx: Arc<TurnContext>| {
            let gate = Arc::clone(&gate);
            async move {
                gate.notify_one();
                Ok(())
            }
        })
    };

    let first = adapter.make_activity("first");
    let mut second = adapter.make_activity("second");
    second.conversation = ConversationAccount::new("convo2");

    let both = async {
        tokio::join!(
            runtime.process_activity(first, waiting),
            runtime.process_activity(second, releasing),
        )
    };
    let (a, b) = tokio::time::timeout(Duration::from_secs(2), both)
        .await
        .expect("turns of different conversations blocked each other");
    assert!(a.unwrap());
    assert!(b.unwrap());
}

#[tokio::test]
async fn test_catch_error_middleware_handles_before_runtime() {
    let adapter = TestAdapter::new();
    let handler_calls = Arc::new(Mutex::new(0));
    let calls = Arc::clone(&handler_calls);

    let runtime = BotRuntime::builder()
        .adapter_arc(adapter.clone())
        .use_middleware(CatchErrorMiddleware::new(|ctx, err| async move {
            ctx.send_text(format!("caught: {err}")).await?;
            Ok(())
        }))
        .on_turn_error(move |_ctx, _err| {
            let calls = Arc::clone(&calls);
            async move {
                *calls.lock() += 1;
                Ok(())
            }
        })
        .build()
        .unwrap();

    let bot = into_callback(|_ctx: Arc<TurnContext>| async move {
        Err(BotError::transport("channel closed"))
    });
    runtime
        .process_activity(adapter.make_activity("hi"), bot)
        .await
        .unwrap();

    assert_eq!(adapter.reply_texts(), ["caught: transport error: channel closed"]);
    assert_eq!(*handler_calls.lock(), 0);
}

#[tokio::test]
async fn test_shutdown_cancels_running_turn() {
    let adapter = TestAdapter::new();
    let gate = Arc::new(Notify::new());
    let held = Arc::clone(&gate);

    let runtime = BotRuntime::builder()
        .adapter_arc(adapter.clone())
        .use_middleware(middleware_fn(move |_ctx, next: Next| {
            let held = Arc::clone(&held);
            async move {
                held.notified().await;
                next.run().await
            }
        }))
        .build()
        .unwrap();

    let bot = into_callback(|ctx: Arc<TurnContext>| async move {
        ctx.send_text("too late").await?;
        Ok(())
    });

    let (result, ()) = tokio::join!(
        runtime.process_activity(adapter.make_activity("hi"), bot),
        async {
            runtime.shutdown();
            gate.notify_one();
        },
    );

    assert!(matches!(result, Err(RuntimeError::Turn(BotError::Cancelled))));
    assert!(adapter.sent().is_empty());
}

#[tokio::test]
async fn test_file_storage_survives_runtime_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = ColloquyConfig::default();
    config.storage.backend = StorageBackend::File;
    config.storage.directory = dir.path().join("state");

    let adapter = TestAdapter::new();

    {
        let user = BotState::user(open_storage(&config.storage));
        let name = user.create_property::<String>("name");
        let runtime = BotRuntime::builder()
            .config(config.clone())
            .adapter_arc(adapter.clone())
            .use_middleware(AutoSaveStateMiddleware::new([user]))
            .build()
            .unwrap();

        let bot = into_callback(move |ctx: Arc<TurnContext>| {
            let name = name.clone();
            async move {
                name.set(&ctx, &ctx.activity().text_or_empty().to_string())
                    .await?;
                Ok(())
            }
        });
        runtime
            .process_activity(adapter.make_activity("Ada"), bot)
            .await
            .unwrap();
    }

    let runtime = BotRuntime::builder()
        .config(config)
        .adapter_arc(adapter.clone())
        .build()
        .unwrap();
    let name = BotState::user(runtime.storage().clone()).create_property::<String>("name");
    let bot = into_callback(move |ctx: Arc<TurnContext>| {
        let name = name.clone();
        async move {
            let known = name.get(&ctx).await?.unwrap_or_default();
            ctx.send_text(format!("hello {known}")).await?;
            Ok(())
        }
    });
    runtime
        .process_activity(adapter.make_activity("again"), bot)
        .await
        .unwrap();

    assert_eq!(adapter.reply_texts(), ["hello Ada"]);
}
