use gateway_server::drivers::opcua::OpcUaDriver;
use gateway_server::drivers::traits::{DeviceDriver, DriverConfig, TagRequest};
use std::sync::Arc;

fn create_test_config(address: &str) -> DriverConfig {
    DriverConfig {
        id: "test_driver".into(),
        name: "Test OPC UA Driver".into(),
        address: address.into(),
        scan_rate_ms: 1000,
        timeout_ms: 3000,
        retry_count: 3,
        connection_config: serde_json::Value::Null,
        application_name: Some("TestClient".into()),
        application_uri: None,
        session_name: Some("TestSession".into()),
        max_message_size: None,
        max_chunk_count: None,
        connect_retry_attempts: Some(3),
        connect_retry_delay_ms: Some(100),
        connect_retry_backoff: Some(1.5),
        connect_timeout_ms: Some(500),
    }
}

#[tokio::test]
async fn test_invalid_endpoint_fails_to_construct_client() {
    let _ = tracing_subscriber::fmt::try_init();

    // Not a valid opc.tcp:// URL, so Client::new itself rejects it.
    let config = create_test_config("invalid://endpoint");
    let driver = OpcUaDriver::new(config);

    let result = driver.connect().await;
    assert!(result.is_err());
    assert!(!driver.connected().await);
}

#[tokio::test]
async fn test_driver_configuration_is_preserved() {
    let config = DriverConfig {
        id: "test_id".into(),
        name: "Test Name".into(),
        address: "opc.tcp://127.0.0.1:4840/".into(),
        scan_rate_ms: 2000,
        timeout_ms: 5000,
        retry_count: 5,
        connection_config: serde_json::Value::Null,
        application_name: Some("CustomApp".into()),
        application_uri: Some("urn:custom:app".into()),
        session_name: Some("CustomSession".into()),
        max_message_size: Some(1000000),
        max_chunk_count: Some(512),
        connect_retry_attempts: Some(10),
        connect_retry_delay_ms: Some(2000),
        connect_retry_backoff: Some(2.5),
        connect_timeout_ms: Some(5000),
    };

    let driver = OpcUaDriver::new(config.clone());
    let returned_config = driver.config();

    assert_eq!(returned_config.id, config.id);
    assert_eq!(returned_config.name, config.name);
    assert_eq!(returned_config.address, config.address);
    assert_eq!(returned_config.scan_rate_ms, config.scan_rate_ms);
    assert_eq!(returned_config.application_name, config.application_name);
    assert_eq!(returned_config.application_uri, config.application_uri);
    assert_eq!(returned_config.session_name, config.session_name);
    assert_eq!(returned_config.max_message_size, config.max_message_size);
    assert_eq!(returned_config.max_chunk_count, config.max_chunk_count);
    assert_eq!(returned_config.connect_retry_attempts, config.connect_retry_attempts);
    assert_eq!(returned_config.connect_retry_delay_ms, config.connect_retry_delay_ms);
    assert_eq!(returned_config.connect_retry_backoff, config.connect_retry_backoff);
    assert_eq!(returned_config.connect_timeout_ms, config.connect_timeout_ms);
}

#[tokio::test]
async fn test_read_tags_without_connection() {
    let _ = tracing_subscriber::fmt::try_init();

    let config = create_test_config("opc.tcp://127.0.0.1:4840/");
    let driver = OpcUaDriver::new(config);

    let requests = vec![TagRequest {
        address: "ns=2;s=Temperature".to_string(),
    }];

    let result = driver.read_batch(&requests).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_browse_without_connection() {
    let _ = tracing_subscriber::fmt::try_init();

    let config = create_test_config("opc.tcp://127.0.0.1:4840/");
    let driver = OpcUaDriver::new(config);

    let result = driver.browse_node("ns=0;i=85").await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_discover_tags_without_connection() {
    let _ = tracing_subscriber::fmt::try_init();

    let config = create_test_config("opc.tcp://127.0.0.1:4840/");
    let driver = OpcUaDriver::new(config);

    let result = driver.discover_tags().await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_multiple_drivers_are_independent() {
    let _ = tracing_subscriber::fmt::try_init();

    let configs = vec![
        create_test_config("opc.tcp://127.0.0.1:4840/"),
        create_test_config("opc.tcp://127.0.0.1:4841/"),
        create_test_config("opc.tcp://127.0.0.1:4842/"),
    ];

    let mut drivers = Vec::new();
    for config in configs {
        let driver = OpcUaDriver::new(config);
        drivers.push(Arc::new(driver));
    }

    assert_eq!(drivers.len(), 3);
    assert_ne!(drivers[0].config().address, drivers[1].config().address);
    assert_ne!(drivers[1].config().address, drivers[2].config().address);

    for driver in &drivers {
        assert!(!driver.connected().await);
    }
}

#[tokio::test]
async fn test_invalid_node_ids_fail_without_connection() {
    // Browsing without a session active always fails with NotConnected,
    // regardless of whether the address itself is well formed.
    let _ = tracing_subscriber::fmt::try_init();

    let config = create_test_config("opc.tcp://127.0.0.1:4840/");
    let driver = OpcUaDriver::new(config);

    let invalid_node_ids = vec!["invalid_node_id", "ns=999;s=NonExistent", "ns=-1;i=0", ""];

    for node_id in invalid_node_ids {
        let result = driver.browse_node(node_id).await;
        assert!(result.is_err());
    }
}

#[tokio::test]
async fn test_driver_lifecycle() {
    let _ = tracing_subscriber::fmt::try_init();

    let config = create_test_config("opc.tcp://127.0.0.1:4840/");
    let driver = OpcUaDriver::new(config);

    assert!(!driver.connected().await);

    // Disconnect is safe even on a never-connected driver.
    let disconnect_result = driver.disconnect().await;
    assert!(disconnect_result.is_ok());

    assert!(!driver.connected().await);
}

#[tokio::test]
async fn test_concurrent_operations_on_unconnected_driver() {
    let _ = tracing_subscriber::fmt::try_init();

    let config = create_test_config("opc.tcp://127.0.0.1:4840/");
    let driver = Arc::new(OpcUaDriver::new(config));

    let mut handles = vec![];

    for i in 0..5 {
        let driver_clone = Arc::clone(&driver);
        let handle = tokio::spawn(async move {
            match i % 3 {
                0 => {
                    let _ = driver_clone.connected().await;
                }
                1 => {
                    let _ = driver_clone.browse_node("ns=0;i=85").await;
                }
                2 => {
                    let requests = vec![TagRequest {
                        address: "ns=2;s=Test".to_string(),
                    }];
                    let _ = driver_clone.read_batch(&requests).await;
                }
                _ => {}
            }
        });
        handles.push(handle);
    }

    for handle in handles {
        let _ = handle.await;
    }

    // The driver never connected during the run, so it stays consistent.
    assert!(!driver.connected().await);
}
