//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 合约快照测试
//! - 内存 broker 上的 e2e 测试（无需 RabbitMQ）

#[cfg(test)]
mod contract_tests {
    #[test]
    fn test_contracts_compile() {
        // 验证 contracts crate 可编译
        let _ = contracts::ConfigVersion::V1;
        assert_eq!(contracts::DEFAULT_HANDLER, dispatcher::MAIN_CONSUME);
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::collections::HashMap;
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use broker::MemoryBroker;
    use contracts::{handler_fn, AckPolicy, ContractError, Message};
    use dispatcher::{
        DispatcherBuilder, DispatcherConfig, DispatcherError, EndpointOptions, HandlerTable,
        DEFAULT_WORKER_COUNT,
    };
    use tokio_util::sync::CancellationToken;

    /// Handler that acks and records message ids in arrival order
    fn collecting(seen: Arc<Mutex<Vec<String>>>) -> contracts::MessageHandler {
        handler_fn(move |msg: Message| {
            let seen = seen.clone();
            async move {
                msg.ack().await?;
                seen.lock()
                    .unwrap()
                    .push(msg.message_id().unwrap_or("unknown").to_string());
                Ok(())
            }
        })
    }

    /// End-to-end test: MemoryBroker -> Dispatcher -> handler
    ///
    /// 单 worker 时按发布顺序处理，队列关闭后 worker 自然退出。
    #[tokio::test]
    async fn test_e2e_single_worker_preserves_order() {
        let queue = Arc::new(MemoryBroker::new("orders"));
        for id in ["a", "b", "c"] {
            queue.publish(Some(id), "payload").unwrap();
        }
        queue.close();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let handlers = HandlerTable::new().register("collect", collecting(seen.clone()));
        let dispatcher = DispatcherBuilder::new(DispatcherConfig::default(), handlers)
            .endpoint("orders", EndpointOptions::new(queue.clone(), 1, "collect"))
            .build()
            .unwrap();

        let handle = dispatcher.start_consumers(CancellationToken::new()).unwrap();
        let snapshot = tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(snapshot.handled, 3);
        assert_eq!(snapshot.consume_errors, 0);
        assert_eq!(queue.settlements().len(), 3);
    }

    /// A panicking handler does not end the consume loop
    #[tokio::test]
    async fn test_e2e_panic_is_contained() {
        let queue = Arc::new(MemoryBroker::new("jobs"));
        queue.publish(Some("boom"), "x").unwrap();
        queue.publish(Some("after"), "y").unwrap();
        queue.close();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let inner = collecting(seen.clone());
        let handlers = HandlerTable::new().register(
            "fragile",
            handler_fn(move |msg: Message| {
                let inner = inner.clone();
                async move {
                    if msg.message_id() == Some("boom") {
                        panic!("handler exploded");
                    }
                    inner(msg).await
                }
            }),
        );
        let dispatcher = DispatcherBuilder::new(DispatcherConfig::default(), handlers)
            .endpoint("jobs", EndpointOptions::new(queue.clone(), 1, "fragile"))
            .build()
            .unwrap();

        let handle = dispatcher.start_consumers(CancellationToken::new()).unwrap();
        let snapshot = tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .unwrap();

        assert_eq!(snapshot.panicked, 1);
        assert_eq!(snapshot.handled, 1);
        assert_eq!(snapshot.consume_errors, 1);
        assert_eq!(snapshot.transport_errors, 0);
        assert_eq!(queue.consume_calls(), 1);
        assert_eq!(*seen.lock().unwrap(), vec!["after"]);
        assert!(queue
            .settlements()
            .contains(&(1, contracts::AckOutcome::Reject { requeue: false })));
    }

    /// 每次调用都 panic：每条消息一条 watcher 记录，且消息被 reject
    #[tokio::test]
    async fn test_e2e_always_panicking_handler() {
        const DELIVERIES: u64 = 5;

        let queue = Arc::new(MemoryBroker::new("poison"));
        for i in 0..DELIVERIES {
            queue.publish(Some(format!("p-{i}").as_str()), "x").unwrap();
        }
        queue.close();

        let handlers = HandlerTable::new().register(
            "explode",
            handler_fn(|msg: Message| async move {
                if !msg.body().is_empty() {
                    panic!("always");
                }
                Ok(())
            }),
        );
        let dispatcher = DispatcherBuilder::new(DispatcherConfig::default(), handlers)
            .endpoint("poison", EndpointOptions::new(queue.clone(), 1, "explode"))
            .build()
            .unwrap();

        let handle = dispatcher.start_consumers(CancellationToken::new()).unwrap();
        let snapshot = tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .unwrap();

        assert_eq!(snapshot.panicked, DELIVERIES);
        assert_eq!(snapshot.consume_errors, DELIVERIES);
        assert_eq!(snapshot.handled, 0);
        assert_eq!(queue.consume_calls(), 1);

        let settlements = queue.settlements();
        assert_eq!(settlements.len() as u64, DELIVERIES);
        assert!(settlements
            .iter()
            .all(|(_, outcome)| *outcome == contracts::AckOutcome::Reject { requeue: false }));
    }

    #[tokio::test]
    async fn test_e2e_worker_fan_out() {
        let queue = Arc::new(MemoryBroker::new("fan"));
        let dispatcher = DispatcherBuilder::new(
            DispatcherConfig::default(),
            HandlerTable::builtin(AckPolicy::Immediate),
        )
        .endpoint("fan", EndpointOptions::new(queue.clone(), 5, "main_consume"))
        .build()
        .unwrap();

        let handle = dispatcher.start_consumers(CancellationToken::new()).unwrap();
        assert_eq!(handle.task_count(), 6);

        for i in 0..20 {
            queue.publish(Some(format!("m-{i}").as_str()), "body").unwrap();
        }
        assert!(queue.wait_for_settlements(20, Duration::from_secs(5)).await);
        assert_eq!(queue.consume_calls(), 5);

        let snapshot = handle.shutdown().await;
        assert_eq!(snapshot.handled, 20);
        assert_eq!(queue.active_consumers(), 0);
    }

    #[tokio::test]
    async fn test_e2e_non_positive_workers_use_default() {
        let zero = Arc::new(MemoryBroker::new("zero"));
        let negative = Arc::new(MemoryBroker::new("negative"));
        let dispatcher = DispatcherBuilder::new(
            DispatcherConfig::default(),
            HandlerTable::builtin(AckPolicy::Immediate),
        )
        .endpoint("zero", EndpointOptions::new(zero.clone(), 0, "main_consume"))
        .endpoint("negative", EndpointOptions::new(negative.clone(), -2, "main_consume"))
        .build()
        .unwrap();

        let handle = dispatcher.start_consumers(CancellationToken::new()).unwrap();
        assert_eq!(handle.task_count(), 1 + 2 * DEFAULT_WORKER_COUNT);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(zero.consume_calls(), DEFAULT_WORKER_COUNT);
        assert_eq!(negative.consume_calls(), DEFAULT_WORKER_COUNT);
        handle.shutdown().await;
    }

    /// 任一 endpoint 校验失败时不启动任何 consumer
    #[tokio::test]
    async fn test_e2e_construction_is_atomic() {
        let good = Arc::new(MemoryBroker::new("good"));
        let bad = Arc::new(MemoryBroker::new("bad"));

        let result = DispatcherBuilder::new(
            DispatcherConfig::default(),
            HandlerTable::builtin(AckPolicy::Immediate),
        )
        .endpoint("good", EndpointOptions::new(good.clone(), 3, "main_consume"))
        .endpoint("bad", EndpointOptions::new(bad.clone(), 3, "nonexistent"))
        .build();

        assert!(matches!(
            result,
            Err(DispatcherError::UnknownHandler { ref handler, .. }) if handler == "nonexistent"
        ));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(good.consume_calls(), 0);
        assert_eq!(bad.consume_calls(), 0);
    }

    #[tokio::test]
    async fn test_e2e_handler_errors_reach_watcher() {
        let queue = Arc::new(MemoryBroker::new("errs"));
        for i in 0..4 {
            queue.publish(Some(format!("e-{i}").as_str()), "x").unwrap();
        }
        queue.publish_fault("connection reset").unwrap();
        queue.close();

        let handlers = HandlerTable::new().register(
            "failing",
            handler_fn(|msg: Message| async move {
                msg.reject(false).await?;
                Err(ContractError::handler("failing", "bad payload"))
            }),
        );
        // 小缓冲区验证背压下不丢错误
        let dispatcher = DispatcherBuilder::new(DispatcherConfig { error_buffer: 1 }, handlers)
            .endpoint("errs", EndpointOptions::new(queue, 2, "failing"))
            .build()
            .unwrap();

        let handle = dispatcher.start_consumers(CancellationToken::new()).unwrap();
        let snapshot = tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .unwrap();

        assert_eq!(snapshot.failed, 4);
        assert_eq!(snapshot.consume_errors, 5);
        assert_eq!(snapshot.transport_errors, 1);
    }

    #[tokio::test]
    async fn test_e2e_dispatcher_from_config_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[service]
name = "proc"

[broker]
kind = "memory"

[dispatcher]
error_buffer = 16
ack_policy = "on_success"

[endpoints.main]
resource = "data-proc"
workers = 3
"#
        )
        .unwrap();

        let blueprint = config_loader::ConfigLoader::load_from_path(file.path()).unwrap();
        assert_eq!(blueprint.dispatcher.ack_policy, AckPolicy::OnSuccess);

        let queue = Arc::new(MemoryBroker::new("data-proc"));
        let endpoints: HashMap<_, _> = blueprint
            .endpoints
            .iter()
            .map(|(name, spec)| {
                (
                    name.clone(),
                    EndpointOptions::new(queue.clone(), spec.workers, spec.handler.clone()),
                )
            })
            .collect();

        let mut builder = DispatcherBuilder::new(
            DispatcherConfig {
                error_buffer: blueprint.dispatcher.error_buffer,
            },
            HandlerTable::builtin(blueprint.dispatcher.ack_policy),
        );
        for (name, options) in endpoints {
            builder = builder.endpoint(name, options);
        }
        let dispatcher = builder.build().unwrap();
        assert_eq!(dispatcher.total_workers(), 3);

        queue.publish(Some("ok"), "payload").unwrap();
        queue.publish(Some("empty"), "").unwrap();
        queue.close();

        let snapshot = dispatcher
            .start_consumers(CancellationToken::new())
            .unwrap()
            .join()
            .await;

        assert_eq!(snapshot.handled, 1);
        assert_eq!(snapshot.failed, 1);
        let outcomes: Vec<_> = queue.settlements().into_iter().map(|(_, o)| o).collect();
        assert!(outcomes.contains(&contracts::AckOutcome::Ack));
        assert!(outcomes.contains(&contracts::AckOutcome::Reject { requeue: false }));
    }
}
