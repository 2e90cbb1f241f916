//! # Concurrency
//!
//! Many publishers on a multi-threaded runtime, and subscription churn while
//! events are in flight.

#[cfg(test)]
mod tests {
    use crate::support::{counter, init_tracing};
    use event_bus::{
        BusConfig, Context, DeliveryMode, Event, EventBus, Priority, SubscribeOptions,
    };
    use rand::Rng;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const PUBLISHERS: usize = 8;
    const EVENTS_PER_PUBLISHER: usize = 200;

    fn bus(workers: usize, queue_size: usize) -> Arc<EventBus> {
        init_tracing();
        let bus = EventBus::new(
            BusConfig::default()
                .with_workers(workers)
                .with_queue_size(queue_size),
        )
        .unwrap();
        bus.start().unwrap();
        Arc::new(bus)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sync_publishers() {
        let bus = bus(2, 64);
        let (handler, calls) = counter();
        bus.subscribe("metrics.**", handler, SubscribeOptions::default())
            .unwrap();

        let publishers: Vec<_> = (0..PUBLISHERS)
            .map(|p| {
                let bus = Arc::clone(&bus);
                tokio::spawn(async move {
                    let ctx = Context::background();
                    for i in 0..EVENTS_PER_PUBLISHER {
                        let topic = format!("metrics.p{p}.e{}", i % 7);
                        bus.publish_sync(&ctx, Event::envelope(topic, i)).await.unwrap();
                    }
                })
            })
            .collect();
        for publisher in futures::future::join_all(publishers).await {
            publisher.unwrap();
        }

        let expected = PUBLISHERS * EVENTS_PER_PUBLISHER;
        assert_eq!(calls.load(Ordering::SeqCst), expected);
        assert_eq!(bus.stats().events_published, expected as u64);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_async_accounting_balances() {
        let bus = bus(4, 32);
        let (handler, calls) = counter();
        bus.subscribe(
            "jobs.*",
            handler,
            SubscribeOptions::default().mode(DeliveryMode::Async),
        )
        .unwrap();

        let rejected = Arc::new(AtomicUsize::new(0));
        let publishers: Vec<_> = (0..PUBLISHERS)
            .map(|_| {
                let bus = Arc::clone(&bus);
                let rejected = Arc::clone(&rejected);
                tokio::spawn(async move {
                    let ctx = Context::background();
                    for i in 0..EVENTS_PER_PUBLISHER {
                        match bus.publish_async(&ctx, Event::envelope("jobs.run", i)) {
                            Ok(()) => {}
                            Err(err) if err.is_queue_full() => {
                                rejected.fetch_add(1, Ordering::SeqCst);
                            }
                            Err(err) => panic!("unexpected publish error: {err}"),
                        }
                    }
                })
            })
            .collect();
        for publisher in futures::future::join_all(publishers).await {
            publisher.unwrap();
        }
        bus.stop(&Context::background()).await.unwrap();

        let stats = bus.stats();
        let total = (PUBLISHERS * EVENTS_PER_PUBLISHER) as u64;
        let rejected = rejected.load(Ordering::SeqCst) as u64;
        assert_eq!(stats.async_stats.enqueued + stats.async_stats.dropped, total);
        assert_eq!(stats.async_stats.dropped, rejected);
        assert_eq!(stats.async_stats.processed, stats.async_stats.enqueued);
        assert_eq!(calls.load(Ordering::SeqCst) as u64, stats.async_stats.succeeded);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_subscription_churn_during_publish() {
        let bus = bus(2, 64);
        let (stable, stable_calls) = counter();
        bus.subscribe("churn.*", stable, SubscribeOptions::default().priority(Priority::CRITICAL))
            .unwrap();

        let publisher = {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move {
                let ctx = Context::background();
                for _ in 0..500 {
                    bus.publish_sync(&ctx, Event::envelope("churn.tick", ())).await.unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };

        let churner = {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move {
                for _ in 0..200 {
                    let pattern = if rand::thread_rng().gen_bool(0.5) {
                        "churn.*"
                    } else {
                        "churn.**"
                    };
                    let (handler, _) = counter();
                    let sub = bus
                        .subscribe(pattern, handler, SubscribeOptions::default())
                        .unwrap();
                    tokio::task::yield_now().await;
                    bus.unsubscribe(sub.id()).unwrap();
                }
            })
        };

        publisher.await.unwrap();
        churner.await.unwrap();

        assert_eq!(stable_calls.load(Ordering::SeqCst), 500);
        assert_eq!(bus.subscription_count(), 1);
        assert_eq!(bus.patterns().len(), 1);
    }
}
