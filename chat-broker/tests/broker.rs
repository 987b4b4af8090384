use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::Result;
use chat_broker::{
    Broker, BrokerConfig, BrokerError, BrokerState, Inbox, Message, RegistrationPolicy, Shutdown,
    inbox,
};
use tokio::{task::JoinHandle, time::timeout};

const WAIT: Duration = Duration::from_secs(1);
const QUIET: Duration = Duration::from_millis(100);

struct Harness {
    shutdown: Shutdown,
    broker: Arc<Broker>,
    event_loop: JoinHandle<()>,
}

impl Harness {
    fn start() -> Result<Self> {
        Self::start_with(BrokerConfig::default())
    }

    fn start_with(config: BrokerConfig) -> Result<Self> {
        let shutdown = Shutdown::new();
        let broker = Broker::with_config(shutdown.clone(), config);
        let event_loop = broker.run()?;
        Ok(Self {
            shutdown,
            broker,
            event_loop,
        })
    }

    async fn join(&self, user: &str) -> Inbox {
        let (tx, rx) = inbox(16);
        self.broker.register_user(user, tx).await;
        rx
    }

    async fn stop(self) -> Result<Arc<Broker>> {
        self.broker.close();
        timeout(WAIT, self.event_loop).await??;
        Ok(self.broker)
    }
}

async fn next(rx: &mut Inbox, who: &str) -> Message {
    timeout(WAIT, rx.recv())
        .await
        .unwrap_or_else(|_| panic!("{who} timed out waiting for a message"))
        .unwrap_or_else(|| panic!("{who}'s inbox closed"))
}

async fn assert_silent(rx: &mut Inbox, who: &str) {
    if let Ok(Some(message)) = timeout(QUIET, rx.recv()).await {
        panic!("{who} unexpectedly received {message:?}");
    }
}

#[tokio::test]
async fn direct_message_reaches_only_recipient() -> Result<()> {
    let harness = Harness::start()?;
    let mut alice = harness.join("alice").await;
    let mut bob = harness.join("bob").await;

    harness
        .broker
        .send(Message::new("alice", "bob", "hi", false, 1))
        .await?;

    let received = next(&mut bob, "bob").await;
    assert_eq!(received, Message::new("alice", "bob", "hi", false, 1));
    assert_silent(&mut bob, "bob").await;
    assert_silent(&mut alice, "alice").await;

    harness.stop().await?;
    Ok(())
}

#[tokio::test]
async fn broadcast_skips_unregistered_users() -> Result<()> {
    let harness = Harness::start()?;
    let mut alice = harness.join("alice").await;
    let mut bob = harness.join("bob").await;
    let mut carol = harness.join("carol").await;

    harness
        .broker
        .send(Message::broadcast("alice", "first"))
        .await?;
    for (rx, who) in [(&mut alice, "alice"), (&mut bob, "bob"), (&mut carol, "carol")] {
        assert_eq!(next(rx, who).await.content, "first");
    }

    assert!(harness.broker.unregister_user("carol").await);
    assert!(carol.recv().await.is_none(), "carol's inbox should close");

    harness
        .broker
        .send(Message::broadcast("alice", "second"))
        .await?;
    assert_eq!(next(&mut alice, "alice").await.content, "second");
    assert_eq!(next(&mut bob, "bob").await.content, "second");
    assert_silent(&mut alice, "alice").await;
    assert_silent(&mut bob, "bob").await;

    let broker = harness.stop().await?;
    assert_eq!(broker.stats().delivered, 5);
    Ok(())
}

#[tokio::test]
async fn direct_messages_keep_send_order() -> Result<()> {
    let harness = Harness::start()?;
    let mut bob = harness.join("bob").await;

    for seq in 0..10 {
        harness
            .broker
            .send(Message::direct("alice", "bob", format!("msg-{seq}")))
            .await?;
    }

    for seq in 0..10 {
        assert_eq!(next(&mut bob, "bob").await.content, format!("msg-{seq}"));
    }

    harness.stop().await?;
    Ok(())
}

#[tokio::test]
async fn unknown_recipient_is_dropped_silently() -> Result<()> {
    let harness = Harness::start()?;
    let mut alice = harness.join("alice").await;

    harness
        .broker
        .send(Message::direct("alice", "nobody", "anyone there?"))
        .await?;
    harness
        .broker
        .send(Message::direct("nobody", "alice", "after"))
        .await?;

    // The second message proves the loop moved past the dropped one.
    assert_eq!(next(&mut alice, "alice").await.content, "after");

    let broker = harness.stop().await?;
    assert_eq!(broker.stats().dropped_unknown_recipient, 1);
    Ok(())
}

#[tokio::test]
async fn send_after_shutdown_always_fails() -> Result<()> {
    let harness = Harness::start()?;
    let mut alice = harness.join("alice").await;

    harness.shutdown.trigger();
    for _ in 0..3 {
        assert_eq!(
            harness
                .broker
                .send(Message::broadcast("alice", "too late"))
                .await,
            Err(BrokerError::ShutDown)
        );
    }
    assert_eq!(
        harness.broker.try_send(Message::broadcast("alice", "too late")),
        Err(BrokerError::ShutDown)
    );

    timeout(WAIT, harness.event_loop).await??;
    assert_eq!(harness.broker.state(), BrokerState::Stopped);

    let stats = harness.broker.stats();
    assert_eq!(stats.enqueued, 0);
    assert_eq!(stats.rejected_sends, 4);
    assert_silent(&mut alice, "alice").await;
    Ok(())
}

#[tokio::test]
async fn shutdown_interrupts_stalled_dispatch() -> Result<()> {
    let harness =
        Harness::start_with(BrokerConfig::default().delivery_timeout(Duration::from_secs(60)))?;

    // A full inbox that is never read stalls the broadcast for the whole timeout.
    let (stalled_tx, _stalled_rx) = inbox(1);
    stalled_tx.send(Message::broadcast("system", "filler")).await?;
    harness.broker.register_user("stalled", stalled_tx).await;

    harness
        .broker
        .send(Message::broadcast("alice", "stuck"))
        .await?;
    tokio::time::sleep(QUIET).await;

    harness.shutdown.trigger();
    timeout(WAIT, harness.event_loop)
        .await
        .expect("event loop should stop promptly after shutdown")?;
    assert_eq!(harness.broker.state(), BrokerState::Stopped);
    Ok(())
}

#[tokio::test]
async fn send_waits_on_full_queue_until_shutdown() -> Result<()> {
    let harness = Harness::start_with(
        BrokerConfig::default()
            .queue_capacity(1)
            .delivery_timeout(Duration::from_secs(30)),
    )?;
    let (stalled_tx, _stalled) = inbox(1);
    stalled_tx.try_send(Message::broadcast("system", "backlog"))?;
    harness.broker.register_user("stalled", stalled_tx).await;

    // The loop takes this one and blocks delivering it.
    harness
        .broker
        .send(Message::broadcast("alice", "stuck"))
        .await?;
    // Completes only once the loop has dequeued "stuck"; now the queue is full.
    harness
        .broker
        .send(Message::broadcast("alice", "queued"))
        .await?;

    let broker = Arc::clone(&harness.broker);
    let mut blocked =
        tokio::spawn(async move { broker.send(Message::broadcast("alice", "waiting")).await });
    assert!(
        timeout(QUIET, &mut blocked).await.is_err(),
        "send should wait while the queue is full"
    );

    harness.shutdown.trigger();
    let result = timeout(WAIT, blocked)
        .await
        .expect("blocked send should settle after shutdown")?;
    assert_eq!(result, Err(BrokerError::ShutDown));

    timeout(WAIT, harness.event_loop).await??;
    Ok(())
}

#[tokio::test]
async fn unregister_closes_inbox_while_lookup_is_held() -> Result<()> {
    let harness = Harness::start()?;
    let mut bob = harness.join("bob").await;

    let held = harness.broker.registry().lookup("bob").await;
    assert!(held.is_some());

    assert!(harness.broker.unregister_user("bob").await);
    let closed = timeout(WAIT, bob.recv())
        .await
        .expect("bob's inbox should close despite the held lookup");
    assert!(closed.is_none());
    assert!(held.and_then(|sender| sender.upgrade()).is_none());

    harness.stop().await?;
    Ok(())
}

#[tokio::test]
async fn unregister_unknown_user_leaves_registry_unchanged() -> Result<()> {
    let harness = Harness::start()?;
    let _alice = harness.join("alice").await;
    let registry = harness.broker.registry();

    assert!(!harness.broker.unregister_user("ghost").await);
    assert_eq!(registry.user_ids().await, vec!["alice"]);

    harness.stop().await?;
    Ok(())
}

#[tokio::test]
async fn reregistered_user_receives_on_new_channel_only() -> Result<()> {
    let harness = Harness::start()?;
    let mut old = harness.join("alice").await;
    let mut new = harness.join("alice").await;

    assert!(old.recv().await.is_none(), "default policy closes the old channel");

    harness
        .broker
        .send(Message::direct("bob", "alice", "hello"))
        .await?;
    assert_eq!(next(&mut new, "new alice").await.content, "hello");

    harness.stop().await?;
    Ok(())
}

#[tokio::test]
async fn return_previous_policy_keeps_old_channel_open() -> Result<()> {
    let harness = Harness::start_with(
        BrokerConfig::default().registration_policy(RegistrationPolicy::ReturnPrevious),
    )?;
    let (old_tx, mut old) = inbox(4);
    harness.broker.register_user("alice", old_tx).await;

    let (new_tx, mut new) = inbox(4);
    let previous = harness
        .broker
        .register_user("alice", new_tx)
        .await
        .expect("previous channel returned to caller");

    harness
        .broker
        .send(Message::broadcast("bob", "everyone"))
        .await?;
    assert_eq!(next(&mut new, "new alice").await.content, "everyone");
    assert_silent(&mut old, "old alice").await;

    drop(previous);
    assert!(old.recv().await.is_none());

    harness.stop().await?;
    Ok(())
}

#[tokio::test]
async fn concurrent_producers_and_registrations() -> Result<()> {
    let harness = Harness::start()?;
    let (observer_tx, mut observer) = inbox(64);
    harness.broker.register_user("observer", observer_tx).await;

    let mut tasks = Vec::new();
    for worker in 0..8 {
        let broker = Arc::clone(&harness.broker);
        tasks.push(tokio::spawn(async move {
            let user = format!("user-{worker}");
            let (tx, _rx) = inbox(64);
            broker.register_user(user.as_str(), tx).await;
            for seq in 0..5 {
                broker
                    .send(Message::direct(user.as_str(), "observer", format!("{seq}")))
                    .await?;
            }
            broker.unregister_user(&user).await;
            Ok::<_, BrokerError>(())
        }));
    }
    for task in tasks {
        task.await??;
    }

    let mut per_sender: HashMap<String, Vec<String>> = HashMap::new();
    for _ in 0..40 {
        let message = next(&mut observer, "observer").await;
        per_sender
            .entry(message.sender)
            .or_default()
            .push(message.content);
    }

    let expected: Vec<String> = (0..5).map(|seq| seq.to_string()).collect();
    assert_eq!(per_sender.len(), 8);
    for contents in per_sender.values() {
        assert_eq!(contents, &expected);
    }

    let broker = harness.stop().await?;
    assert_eq!(broker.registry().user_ids().await, vec!["observer"]);
    Ok(())
}
