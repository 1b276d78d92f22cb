use std::sync::Arc;

use dotenv::dotenv;

use crate::common::config::load_cluster_config;
use crate::common::event::{EventKind, EventType};
use crate::server::loader::load_coord_store;
use crate::server::node::ClusterNode;

pub async fn server_start(config_path: &str) -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();
    log::info!("Starting cluster coordination node...");

    let config = load_cluster_config(config_path)?;
    let store = Arc::new(load_coord_store(&config).await?);
    let node = ClusterNode::new(&config, store);

    register_logging_handlers(&node).await;
    node.start().await?;

    let status = node.cluster_status().await;
    log::info!(
        "Node {} joined cluster (leader {}, {} known nodes)",
        status.node_id,
        status.leader_id,
        status.nodes.len()
    );

    tokio::signal::ctrl_c().await?;
    log::info!("Shutdown signal received");
    node.shutdown().await;
    Ok(())
}

async fn register_logging_handlers(node: &ClusterNode) {
    let coordinator = &node.coordinator;
    coordinator
        .register_event_handler(EventType::NodeJoin, |event| {
            if let EventKind::NodeJoin { node } = &event.kind {
                log::info!("✅ Node joined: {} ({}:{})", node.id, node.ip, node.port);
            }
            Ok(())
        })
        .await;
    coordinator
        .register_event_handler(EventType::NodeLeave, |event| {
            log::info!("👋 Node left: {}", event.node_id);
            Ok(())
        })
        .await;
    coordinator
        .register_event_handler(EventType::NodeUpdate, |event| {
            if let EventKind::NodeUpdate { node_id, old_status, new_status } = &event.kind {
                log::info!("Node {} status {:?} -> {:?}", node_id, old_status, new_status);
            }
            Ok(())
        })
        .await;
    coordinator
        .register_event_handler(EventType::CacheInvalidate, |event| {
            if let EventKind::CacheInvalidate { patterns } = &event.kind {
                log::info!("🧹 Cache invalidation from {}: {:?}", event.node_id, patterns);
            }
            Ok(())
        })
        .await;
}
