//! Whole-stack benchmark runs over an in-process cluster.

use std::sync::Arc;

use rpcdist::{
    BenchConfig, Coordinator, GroupService, LocalHub, RpcDistError, RunResult,
};

async fn cluster(
    size: usize,
    config: BenchConfig,
) -> Result<Vec<Arc<Coordinator>>, RpcDistError> {
    let hub = LocalHub::new();
    let mut coordinators = vec![];
    for i in 0..size {
        let coordinator = Coordinator::new(
            Arc::new(hub.member(format!("n{}", i))),
            config.clone(),
        )?;
        coordinator.join().await?;
        coordinators.push(coordinator);
    }
    Ok(coordinators)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn four_node_async_run() -> Result<(), RpcDistError> {
    let config = BenchConfig {
        num_msgs: 200,
        num_threads: 4,
        msg_size: 64,
        ..Default::default()
    };
    let coordinators = cluster(4, config).await?;
    let driver = &coordinators[0];

    let results = driver.start_benchmark().await?;
    assert_eq!(results.len(), 4);
    let view = driver.view();
    for ((addr, result), member) in results.iter().zip(view.members()) {
        assert_eq!(addr, member);
        let result = result.as_ref().map_err(|e| e.clone())?;
        assert_eq!(result.num_invokers, 4);
        assert_eq!(result.num_calls(), 200);
        assert_eq!(result.num_failures, 0);
    }
    let total = RunResult::aggregate(
        results.iter().filter_map(|(_, r)| r.as_ref().ok()),
    );
    assert_eq!(total.num_calls(), 800);
    assert!(total.read_fraction() > 0.6 && total.read_fraction() < 0.95);

    for c in &coordinators {
        c.leave().await?;
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reconfigure_then_run() -> Result<(), RpcDistError> {
    let config = BenchConfig {
        num_msgs: 30,
        msg_size: 8,
        ..Default::default()
    };
    let coordinators = cluster(3, config).await?;
    let driver = &coordinators[1];

    // rejected before anything goes out
    driver.broadcast_num_threads(4).await?;
    assert!(driver.start_benchmark().await.is_err());
    assert!(driver.broadcast_anycast_count(4).await.is_err());

    driver.broadcast_num_threads(3).await?;
    driver.broadcast_anycast_count(3).await?;
    driver.broadcast_msg_size(128).await?;
    assert!(driver.toggle_oob().await?);
    assert!(driver.toggle_sync().await?);
    for c in &coordinators {
        let config = c.config();
        assert_eq!(config.num_threads, 3);
        assert_eq!(config.anycast_count, 3);
        assert_eq!(config.msg_size, 128);
        assert!(config.out_of_band && config.synchronous);
        assert_eq!(c.get(None)?.len(), 128);
    }

    let results = driver.start_benchmark().await?;
    let mut total_puts = 0;
    for (_, result) in &results {
        let result = result.as_ref().map_err(|e| e.clone())?;
        assert_eq!(result.num_calls(), 30);
        assert_eq!(result.num_failures, 0);
        total_puts += result.num_puts;
    }
    // synchronous writes reach all three members before the run ends
    let served: u64 = coordinators.iter().map(|c| c.num_puts_served()).sum();
    assert_eq!(served, total_puts * 3);

    coordinators[2].leave().await?;
    assert_eq!(driver.view().size(), 2);
    assert!(driver.broadcast_anycast_count(3).await.is_err());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn single_member_run() -> Result<(), RpcDistError> {
    let config = BenchConfig {
        num_msgs: 7,
        ..Default::default()
    };
    let coordinators = cluster(1, config).await?;
    let results = coordinators[0].start_benchmark().await?;
    assert_eq!(results.len(), 1);
    let result = results[0].1.as_ref().map_err(|e| e.clone())?;
    assert_eq!(result.num_calls(), 7);
    assert_eq!(result.num_failures, 0);

    let member = LocalHub::new().member("lonely");
    assert_eq!(member.view().size(), 0);
    Ok(())
}
