use std::sync::Arc;
use std::time::Duration;

use msgpack_rpc_rs::{
    Address, Client, Executor, HandlerMap, MessageParserConfig, MethodProcessor, ReconnectConfig,
    Server, Uri,
};

fn executor() -> Arc<Executor> {
    Executor::from_current()
}

async fn start_echo_add_server() -> (Arc<Server>, Uri) {
    let mut handlers = HandlerMap::new();
    handlers.register("add", |params| {
        let array = params.as_array().ok_or_else(|| {
            msgpack_rpc_rs::Status::invalid_argument("expected array params")
        })?;
        let a = array[0].as_i64().unwrap_or(0);
        let b = array[1].as_i64().unwrap_or(0);
        Ok(rmpv::Value::from(a + b))
    });

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    handlers.register_notification("write", move |params| {
        if let Some(text) = params.as_array().and_then(|a| a.first()).and_then(|v| v.as_str()) {
            seen_clone.lock().unwrap().push(text.to_string());
        }
    });

    let processor: Arc<dyn MethodProcessor> = Arc::new(handlers);
    let uri = Uri::parse("tcp://127.0.0.1:0").unwrap();
    let server = Server::bind(&[uri], MessageParserConfig::default(), processor, executor())
        .await
        .unwrap();
    server.start().unwrap();

    let bound_uri = match server.local_addresses().into_iter().next().unwrap() {
        Address::Tcp(ip, port) => Uri::parse(&format!("tcp://{ip}:{port}")).unwrap(),
        other => panic!("expected a tcp address, got {other:?}"),
    };
    (server, bound_uri)
}

#[tokio::test]
async fn request_response_round_trip() {
    let (server, uri) = start_echo_add_server().await;

    let client = Client::new(
        vec![uri],
        MessageParserConfig::default(),
        ReconnectConfig::default(),
        executor(),
    );
    client.start();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let sum: i64 = client.call("add", (2_i32, 3_i32)).await.unwrap();
    assert_eq!(sum, 5);

    client.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn notification_is_one_way() {
    let (server, uri) = start_echo_add_server().await;

    let client = Client::new(
        vec![uri],
        MessageParserConfig::default(),
        ReconnectConfig::default(),
        executor(),
    );
    client.start();
    tokio::time::sleep(Duration::from_millis(100)).await;

    client.notify("write", ("hello",)).unwrap();
    // No response is ever produced for a notification; a subsequent call
    // still round-trips normally, proving the connection wasn't wedged.
    let sum: i64 = client.call("add", (1_i32, 1_i32)).await.unwrap();
    assert_eq!(sum, 2);

    client.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn unknown_method_surfaces_as_server_error() {
    let (server, uri) = start_echo_add_server().await;

    let client = Client::new(
        vec![uri],
        MessageParserConfig::default(),
        ReconnectConfig::default(),
        executor(),
    );
    client.start();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let err = client.call::<i64, _>("subtract", (5_i32, 3_i32)).await.unwrap_err();
    assert_eq!(err.code(), msgpack_rpc_rs::StatusCode::ServerError);
    assert!(err.message().contains("subtract"));

    client.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn malformed_frame_closes_one_connection_but_acceptor_keeps_accepting() {
    let (server, uri) = start_echo_add_server().await;
    let ip = uri.host_or_path().to_string();
    let port = uri.port().unwrap();

    // Send one byte the msgpack spec reserves as "never used": the server
    // should close this connection without taking the acceptor down.
    let mut bad = tokio::net::TcpStream::connect((ip.as_str(), port)).await.unwrap();
    use tokio::io::AsyncWriteExt;
    bad.write_all(&[0xC1]).await.unwrap();
    drop(bad);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let client = Client::new(
        vec![uri],
        MessageParserConfig::default(),
        ReconnectConfig::default(),
        executor(),
    );
    client.start();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let sum: i64 = client.call("add", (4_i32, 5_i32)).await.unwrap();
    assert_eq!(sum, 9);

    client.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn client_reconnects_after_server_restart() {
    let (server, uri) = start_echo_add_server().await;

    let client = Client::new(
        vec![uri.clone()],
        MessageParserConfig::default(),
        ReconnectConfig::new(Duration::from_millis(20), Duration::from_millis(200), 2.0).unwrap(),
        executor(),
    );
    client.start();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let sum: i64 = client.call("add", (1_i32, 2_i32)).await.unwrap();
    assert_eq!(sum, 3);

    server.stop().await;
    // Give the client's reconnect loop a moment to notice the drop.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut handlers = HandlerMap::new();
    handlers.register("add", |params| {
        let array = params.as_array().unwrap();
        let a = array[0].as_i64().unwrap_or(0);
        let b = array[1].as_i64().unwrap_or(0);
        Ok(rmpv::Value::from(a + b))
    });
    let processor: Arc<dyn MethodProcessor> = Arc::new(handlers);
    let restarted = Server::bind(&[uri], MessageParserConfig::default(), processor, executor())
        .await
        .unwrap();
    restarted.start().unwrap();

    // Poll for reconnection rather than sleeping a fixed backoff window.
    let mut last_err = None;
    let mut sum = None;
    for _ in 0..50 {
        match client.call::<i64, _>("add", (10_i32, 20_i32)).await {
            Ok(value) => {
                sum = Some(value);
                break;
            }
            Err(status) => last_err = Some(status),
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(sum, Some(30), "client never reconnected: {last_err:?}");

    client.stop().await;
    restarted.stop().await;
}
