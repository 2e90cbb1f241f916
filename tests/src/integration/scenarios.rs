//! # End-to-End Scenarios
//!
//! Publish/subscribe flows across registry, matcher and both dispatchers.

#[cfg(test)]
mod tests {
    use crate::support::{counter, init_tracing, panicking, CallLog};
    use event_bus::{
        from_source, BusConfig, BusError, Context, DeliveryMode, Envelope, Event, EventBus,
        EventPublisher, EventSubscriber, Metadata, MetadataProvider, Priority, SubscribeOptions,
        Subscription, Topic, TopicProvider,
    };
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    #[derive(Debug)]
    struct BufferSaved {
        path: String,
        metadata: Metadata,
    }

    impl BufferSaved {
        fn new(path: &str) -> Self {
            Self {
                path: path.to_string(),
                metadata: Metadata::new().with_source("editor"),
            }
        }
    }

    impl TopicProvider for BufferSaved {
        fn topic(&self) -> Topic {
            Topic::new("buffer.saved")
        }
    }

    impl MetadataProvider for BufferSaved {
        fn metadata(&self) -> Option<&Metadata> {
            Some(&self.metadata)
        }
    }

    fn started_bus() -> EventBus {
        init_tracing();
        let bus = EventBus::new(BusConfig::default().with_workers(2).with_queue_size(128)).unwrap();
        bus.start().unwrap();
        bus
    }

    fn sync_at(priority: Priority) -> SubscribeOptions {
        SubscribeOptions::default().priority(priority)
    }

    fn async_at(priority: Priority) -> SubscribeOptions {
        SubscribeOptions::default()
            .priority(priority)
            .mode(DeliveryMode::Async)
    }

    // =============================================================================
    // SCENARIOS
    // =============================================================================

    /// `buffer.*` at Normal and `**` at Critical both receive `buffer.saved`,
    /// Critical first.
    #[tokio::test]
    async fn test_wildcard_subscribers_receive_in_priority_order() {
        let bus = started_bus();
        let log = CallLog::new();
        bus.subscribe("buffer.*", log.handler("buffer.*"), sync_at(Priority::NORMAL))
            .unwrap();
        bus.subscribe("**", log.handler("**"), sync_at(Priority::CRITICAL))
            .unwrap();

        bus.publish_sync(&Context::background(), Event::envelope("buffer.saved", ()))
            .await
            .unwrap();

        assert_eq!(log.entries(), vec!["**", "buffer.*"]);
        let stats = bus.stats();
        assert_eq!(stats.events_published, 1);
        assert_eq!(stats.handlers_executed, 2);
    }

    #[tokio::test]
    async fn test_priority_order_independent_of_subscribe_order() {
        let bus = started_bus();
        let log = CallLog::new();
        for (name, priority) in [
            ("normal", Priority::NORMAL),
            ("low", Priority::LOW),
            ("high", Priority::HIGH),
            ("critical", Priority::CRITICAL),
        ] {
            bus.subscribe("editor.mode.changed", log.handler(name), sync_at(priority))
                .unwrap();
        }

        bus.publish_sync(&Context::background(), Event::envelope("editor.mode.changed", ()))
            .await
            .unwrap();

        assert_eq!(log.entries(), vec!["critical", "high", "normal", "low"]);
    }

    #[tokio::test]
    async fn test_single_and_multi_wildcards() {
        let bus = started_bus();
        let (one, one_calls) = counter();
        let (many, many_calls) = counter();
        bus.subscribe("buffer.*", one, SubscribeOptions::default())
            .unwrap();
        bus.subscribe("buffer.**", many, SubscribeOptions::default())
            .unwrap();

        let ctx = Context::background();
        for topic in ["buffer", "buffer.saved", "buffer.content.inserted", "cursor.moved"] {
            bus.publish_sync(&ctx, Event::envelope(topic, ())).await.unwrap();
        }

        assert_eq!(one_calls.load(Ordering::SeqCst), 1);
        assert_eq!(many_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_domain_event_routed_by_its_topic() {
        let bus = started_bus();
        let (handler, calls) = counter();
        bus.subscribe(
            "buffer.saved",
            handler,
            SubscribeOptions::default().filter(from_source("editor")),
        )
        .unwrap();

        let paths = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen = Arc::clone(&paths);
        bus.subscribe_fn(
            "buffer.*",
            move |_ctx, event: Event| {
                if let Some(saved) = event.downcast_ref::<BufferSaved>() {
                    seen.lock().push(saved.path.clone());
                }
                async { Ok(()) }
            },
            SubscribeOptions::default(),
        )
        .unwrap();

        bus.publish_sync(&Context::background(), Event::new(BufferSaved::new("/src/main.rs")))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*paths.lock(), vec!["/src/main.rs".to_string()]);
    }

    #[tokio::test]
    async fn test_pause_suppresses_both_modes() {
        let bus = started_bus();
        let (sync_handler, sync_calls) = counter();
        let (async_handler, async_calls) = counter();
        bus.subscribe("a.b", sync_handler, sync_at(Priority::NORMAL))
            .unwrap();
        bus.subscribe("a.b", async_handler, async_at(Priority::NORMAL))
            .unwrap();

        bus.pause();
        let ctx = Context::background();
        assert_eq!(bus.publish_sync(&ctx, Event::envelope("a.b", ())).await, Ok(()));
        assert_eq!(bus.publish_async(&ctx, Event::envelope("a.b", ())), Ok(()));

        bus.stop(&ctx).await.unwrap();
        assert_eq!(sync_calls.load(Ordering::SeqCst), 0);
        assert_eq!(async_calls.load(Ordering::SeqCst), 0);
        assert!(bus.is_paused());
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent_once() {
        let bus = started_bus();
        let (handler, calls) = counter();
        let sub = bus
            .subscribe("a", handler, SubscribeOptions::default())
            .unwrap();

        assert!(bus.unsubscribe(sub.id()).is_ok());
        assert!(matches!(
            bus.unsubscribe(sub.id()),
            Err(BusError::SubscriptionNotFound(_))
        ));

        bus.publish_sync(&Context::background(), Event::envelope("a", ()))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(bus.patterns().is_empty());
    }

    #[tokio::test]
    async fn test_sync_panic_isolated() {
        let bus = started_bus();
        let (after, after_calls) = counter();
        bus.subscribe("a", panicking(), sync_at(Priority::HIGH)).unwrap();
        bus.subscribe("a", after, sync_at(Priority::LOW)).unwrap();

        let result = bus
            .publish_sync(&Context::background(), Event::envelope("a", ()))
            .await;

        assert!(result.is_ok());
        assert_eq!(after_calls.load(Ordering::SeqCst), 1);
        assert_eq!(bus.stats().sync_stats.panicked, 1);
    }

    #[tokio::test]
    async fn test_async_panic_isolated() {
        init_tracing();
        let bus = EventBus::new(BusConfig::default().with_workers(1)).unwrap();
        bus.start().unwrap();
        let (after, after_calls) = counter();
        bus.subscribe("a", panicking(), async_at(Priority::HIGH))
            .unwrap();
        bus.subscribe("a", after, async_at(Priority::LOW)).unwrap();

        let ctx = Context::background();
        bus.publish_async(&ctx, Event::envelope("a", ())).unwrap();
        bus.stop(&ctx).await.unwrap();

        assert_eq!(after_calls.load(Ordering::SeqCst), 1);
        let stats = bus.stats();
        assert_eq!(stats.async_stats.panicked, 1);
        assert_eq!(stats.async_stats.succeeded, 1);
        assert_eq!(stats.handler_panics, 1);
    }

    #[tokio::test]
    async fn test_publisher_and_subscriber_traits() {
        let bus = started_bus();
        let subscriber: &dyn EventSubscriber = &bus;
        let publisher: &dyn EventPublisher = &bus;

        let (handler, calls) = counter();
        let sub = subscriber
            .subscribe(
                Topic::new("plugin.*"),
                handler,
                SubscribeOptions::default().mode(DeliveryMode::Async),
            )
            .unwrap();

        let ctx = Context::background();
        publisher
            .publish(&ctx, Event::envelope("plugin.loaded", ()))
            .await
            .unwrap();
        assert_eq!(publisher.events_published(), 1);

        bus.stop(&ctx).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        subscriber.unsubscribe(sub.id()).unwrap();
    }

    #[tokio::test]
    async fn test_registered_builder_subscription() {
        let bus = started_bus();
        let log = CallLog::new();
        let sub = Subscription::builder("lsp.diagnostics.*")
            .id("diagnostics-panel")
            .handler(log.handler("panel"))
            .priority(Priority::HIGH)
            .build()
            .unwrap();
        bus.register(sub).unwrap();

        let duplicate = Subscription::builder("lsp.**")
            .id("diagnostics-panel")
            .handler(log.handler("dup"))
            .build()
            .unwrap();
        assert!(matches!(
            bus.register(duplicate),
            Err(BusError::InvalidSubscription(_))
        ));

        let event = Envelope::new("lsp.diagnostics.published", vec![1_u32, 2, 3])
            .with_correlation_id("req-7");
        bus.publish_sync(&Context::background(), event).await.unwrap();

        assert_eq!(log.entries(), vec!["panel"]);
        assert!(bus.subscription("diagnostics-panel").is_some());
    }

    #[tokio::test]
    async fn test_once_across_modes() {
        let bus = started_bus();
        let (handler, calls) = counter();
        bus.subscribe(
            "job.done",
            handler,
            SubscribeOptions::default().mode(DeliveryMode::Async).once(),
        )
        .unwrap();

        let ctx = Context::background();
        for _ in 0..10 {
            bus.publish_async(&ctx, Event::envelope("job.done", ())).unwrap();
        }
        bus.stop(&ctx).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_subscription_swept_on_demand() {
        let bus = started_bus();
        let (handler, calls) = counter();
        let sub = bus
            .subscribe("a.*", handler, SubscribeOptions::default())
            .unwrap();

        sub.cancel();
        bus.publish_sync(&Context::background(), Event::envelope("a.b", ()))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert_eq!(bus.remove_cancelled(), 1);
        assert_eq!(bus.subscription_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_deadline_exceeded() {
        init_tracing();
        let bus = EventBus::new(BusConfig::default().with_workers(1)).unwrap();
        bus.start().unwrap();
        bus.subscribe_fn(
            "slow",
            |_ctx, _event| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            },
            SubscribeOptions::default().mode(DeliveryMode::Async),
        )
        .unwrap();

        let ctx = Context::background();
        bus.publish_async(&ctx, Event::envelope("slow", ())).unwrap();

        let shutdown = Context::background().with_timeout(Duration::from_secs(1));
        let err = bus.stop(&shutdown).await.unwrap_err();
        assert!(matches!(err, BusError::Dispatch(_)));
        assert!(!bus.is_running());
        assert_eq!(
            bus.publish_async(&ctx, Event::envelope("slow", ())),
            Err(BusError::NotRunning)
        );
    }

    #[tokio::test]
    async fn test_stats_serialize() {
        let bus = started_bus();
        let (handler, _calls) = counter();
        bus.subscribe("a", handler, SubscribeOptions::default())
            .unwrap();
        bus.publish_sync(&Context::background(), Event::envelope("a", ()))
            .await
            .unwrap();

        let json = serde_json::to_value(bus.stats()).unwrap();
        assert_eq!(json["events_published"], 1);
        assert_eq!(json["handlers_executed"], 1);
        assert_eq!(json["sync_stats"]["succeeded"], 1);
    }
}
