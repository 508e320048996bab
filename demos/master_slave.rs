//! Master/Slave Participant
//!
//! This example drives a few partitions of a replicated database through the
//! MasterSlave state model the way a controller would.
//!
//! Key concepts:
//! - Registering a factory with per-edge transition behavior
//! - Per-partition ordering with many partitions in flight
//! - Stale and illegal messages rejected without touching state
//! - A transition that outlives its deadline being fenced off
//!
//! Run with: RUST_LOG=debug cargo run --example master_slave

use participant_engine::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn database_factory() -> Arc<dyn StateModelFactory> {
    Arc::new(|partition: &PartitionKey| {
        let slow = partition.partition.ends_with("_2");
        TransitionHandlers::new()
            .on("OFFLINE", "SLAVE", |ctx: TransitionContext| async move {
                println!("  [{}] opening local store", ctx.partition);
                Ok::<(), TransitionFailure>(())
            })
            .on("SLAVE", "MASTER", move |ctx: TransitionContext| async move {
                if slow {
                    // replica far behind; will miss its deadline
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
                println!("  [{}] promoted after {:?}", ctx.partition, ctx.elapsed());
                Ok::<(), TransitionFailure>(())
            })
    })
}

fn describe(result: &TransitionResult) -> String {
    match result.error_kind {
        None => format!("ok -> {}", result.resulting_state),
        Some(kind) => format!(
            "{} (state {}): {}",
            kind,
            result.resulting_state,
            result.error_detail.as_deref().unwrap_or("")
        ),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    println!("=== Master/Slave Participant Example ===\n");

    let store = Arc::new(InMemoryStateStore::new());
    let engine = StateMachineEngine::new(
        EngineConfig::default(),
        Arc::new(NoopResultSink),
        store.clone(),
    )
    .unwrap();
    let definition = Arc::new(StateModelDefinition::master_slave());
    engine.register_state_model_factory(definition, database_factory());

    println!("Bringing three partitions up to MASTER:");
    let mut handles = Vec::new();
    for i in 0..3 {
        let partition = format!("TestDB_{}", i);
        handles.push(engine.accept(TransitionMessage::new(
            "TestDB", &partition, "OFFLINE", "SLAVE", "MasterSlave",
        )));
        handles.push(engine.accept(
            TransitionMessage::new("TestDB", &partition, "SLAVE", "MASTER", "MasterSlave")
                .with_timeout(Duration::from_millis(200)),
        ));
    }
    for handle in handles {
        let partition = handle.partition().clone();
        if let Some(result) = handle.await {
            println!("  {} {}", partition, describe(&result));
        }
    }

    println!("\nRejected messages:");
    let stale = engine
        .accept(TransitionMessage::new(
            "TestDB", "TestDB_0", "OFFLINE", "SLAVE", "MasterSlave",
        ))
        .await;
    let illegal = engine
        .accept(TransitionMessage::new(
            "TestDB", "TestDB_3", "OFFLINE", "MASTER", "MasterSlave",
        ))
        .await;
    let unknown = engine
        .accept(TransitionMessage::new(
            "TestDB", "TestDB_0", "OFFLINE", "ONLINE", "OnlineOffline",
        ))
        .await;
    for result in [stale, illegal, unknown].iter().flatten() {
        println!("  {}", describe(result));
    }

    println!("\nCheckpoint:");
    let checkpoint = engine.checkpoint();
    for snapshot in &checkpoint.partitions {
        let persisted = store
            .get(&snapshot.partition)
            .map(|r| r.state)
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {} {} state={} persisted={}",
            snapshot.factory, snapshot.partition, snapshot.state, persisted
        );
    }

    engine.shutdown().await;
    println!("\n=== Example Complete ===");
}
