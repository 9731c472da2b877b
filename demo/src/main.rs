use anyhow::Result as AnyResult;
use futures_util::StreamExt;
use notify_core::{
    NotificationConfig, NotificationEngine, NotificationEvent, NotificationStatus, Priority,
};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    init_tracing();

    let config = NotificationConfig {
        cache_ttl: Some(Duration::from_secs(300)),
        ..Default::default()
    };
    let system = NotificationEngine::simulated(config).start()?;

    // 历史订阅：回放 + 实时尾部，逐行输出 JSON
    let mut history = system.subscribe_history();
    let printer = tokio::spawn(async move {
        while let Some(event) = history.next().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(err) => tracing::warn!(error = %err, "failed to encode history entry"),
            }
        }
    });

    let priorities = [Priority::Low, Priority::Medium, Priority::High];
    for i in 0..9 {
        let priority = priorities[i % priorities.len()];
        system.publish(
            NotificationEvent::builder()
                .source("demo")
                .message(format!("notification #{i} ({priority:?})"))
                .priority(priority)
                .build(),
        );
    }

    // 电话通道最坏需要 3 次 × 1s
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(4)) => {}
        _ = tokio::signal::ctrl_c() => {}
    }

    let retried = system.retry_failed();
    info!(count = retried.len(), "retry sweep submitted");
    tokio::time::sleep(Duration::from_secs(4)).await;

    let failed = system
        .history_snapshot()
        .iter()
        .filter(|e| e.status() == Some(NotificationStatus::Failed))
        .count();
    info!(
        cached = system.cached_len(),
        failed_in_history = failed,
        "shutting down"
    );

    system.shutdown();
    system.join().await;
    printer.abort();
    Ok(())
}
