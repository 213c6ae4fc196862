//! agent注册循环的测试
//!
//! 注册键随租约维持在线, 移除项目后随租约过期自动消失。

use std::sync::Arc;
use std::time::Duration;

use cronflow_agent::Registrar;
use cronflow_common::constants::UNKNOWN_NODE_IP;
use cronflow_domain::coordination::CoordStore;
use cronflow_domain::entities::ClientInfo;
use cronflow_domain::keys;
use cronflow_infrastructure::MemoryCoordStore;

async fn wait_for_key(store: &Arc<dyn CoordStore>, key: &str, present: bool) -> bool {
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            let exists = store.get(key).await.unwrap().is_some();
            if exists == present {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await
    .is_ok()
}

#[tokio::test(start_paused = true)]
async fn register_publishes_client_info() {
    let store: Arc<dyn CoordStore> = Arc::new(MemoryCoordStore::new());
    let registrar = Registrar::new(store.clone(), "10.0.0.9".to_string(), "0.1.0".to_string());

    registrar.register(&[7]).await.unwrap();
    let key = keys::register_key(7, "10.0.0.9");
    assert!(wait_for_key(&store, &key, true).await, "注册键应出现");

    let raw = store.get(&key).await.unwrap().unwrap().value;
    let info: ClientInfo = serde_json::from_str(&raw).unwrap();
    assert_eq!(info.client_ip, "10.0.0.9");
    assert_eq!(info.version, "0.1.0");
}

#[tokio::test(start_paused = true)]
async fn keep_alive_outlives_lease_ttl() {
    let store: Arc<dyn CoordStore> = Arc::new(MemoryCoordStore::new());
    let registrar = Registrar::new(store.clone(), "10.0.0.9".to_string(), "0.1.0".to_string());

    registrar.register(&[7]).await.unwrap();
    let key = keys::register_key(7, "10.0.0.9");
    assert!(wait_for_key(&store, &key, true).await);

    // 远超10秒租约TTL后键仍然在线
    tokio::time::advance(Duration::from_secs(60)).await;
    assert!(store.get(&key).await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn removed_project_expires_from_store() {
    let store: Arc<dyn CoordStore> = Arc::new(MemoryCoordStore::new());
    let registrar = Registrar::new(store.clone(), "10.0.0.9".to_string(), "0.1.0".to_string());

    registrar.register(&[7, 8]).await.unwrap();
    let key7 = keys::register_key(7, "10.0.0.9");
    let key8 = keys::register_key(8, "10.0.0.9");
    assert!(wait_for_key(&store, &key7, true).await);
    assert!(wait_for_key(&store, &key8, true).await);

    registrar.remove_project(7).await;
    assert!(wait_for_key(&store, &key7, false).await, "移除后键应随租约过期");
    // 其余项目不受影响
    assert!(store.get(&key8).await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn empty_node_ip_falls_back_to_placeholder() {
    let store: Arc<dyn CoordStore> = Arc::new(MemoryCoordStore::new());
    let registrar = Registrar::new(store.clone(), String::new(), "0.1.0".to_string());
    assert_eq!(registrar.local_ip(), UNKNOWN_NODE_IP);

    registrar.register(&[3]).await.unwrap();
    let key = keys::register_key(3, UNKNOWN_NODE_IP);
    assert!(wait_for_key(&store, &key, true).await);
}
