use gateway_server::drivers::opcua::OpcUaDriver;
use gateway_server::drivers::traits::{DeviceDriver, DriverConfig, TagRequest};
use gateway_server::tags::structures::{Quality, TagValue, ValueVariant};

fn test_config(address: &str) -> DriverConfig {
    DriverConfig {
        id: "srv".into(),
        name: "srv".into(),
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
        connect_retry_backoff: Some(1.0),
        connect_timeout_ms: Some(500),
    }
}

#[tokio::test]
async fn read_tag_before_connect_fails_not_connected() {
    let driver = OpcUaDriver::new(test_config("opc.tcp://127.0.0.1:4840/"));
    assert!(!driver.connected().await);

    let request = TagRequest {
        address: "ns=2;s=Temperature".into(),
    };
    let result = driver.read_tag(&request).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn read_batch_before_connect_fails_not_connected() {
    let driver = OpcUaDriver::new(test_config("opc.tcp://127.0.0.1:4840/"));

    let requests = vec![
        TagRequest {
            address: "ns=2;s=Temperature".into(),
        },
        TagRequest {
            address: "ns=2;s=Pressure".into(),
        },
        TagRequest {
            address: "ns=2;s=Counter".into(),
        },
    ];
    let result = driver.read_batch(&requests).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn write_tag_before_connect_fails_not_connected() {
    let driver = OpcUaDriver::new(test_config("opc.tcp://127.0.0.1:4840/"));

    let request = TagRequest {
        address: "ns=2;s=Counter".into(),
    };
    let value = TagValue::new(ValueVariant::Int(42), Quality::Good);
    let result = driver.write_tag(&request, value).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn disconnect_without_connecting_is_a_noop() {
    let driver = OpcUaDriver::new(test_config("opc.tcp://127.0.0.1:4840/"));
    assert!(driver.disconnect().await.is_ok());
    assert!(!driver.connected().await);
}

#[tokio::test]
async fn diagnostics_before_any_activity_are_zeroed() {
    let driver = OpcUaDriver::new(test_config("opc.tcp://127.0.0.1:4840/"));
    let diag = driver.diagnostics().await;
    assert_eq!(diag.reads, 0);
    assert_eq!(diag.writes, 0);
    assert_eq!(diag.errors, 0);
    assert_eq!(diag.reconnects, 0);
    assert!(diag.last_error.is_none());
}
