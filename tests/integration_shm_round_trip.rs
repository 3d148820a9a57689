use std::sync::Arc;
use std::time::Duration;

use msgpack_rpc_rs::{
    Address, Client, Executor, HandlerMap, MessageParserConfig, MethodProcessor, ReconnectConfig,
    Server, Uri,
};

fn executor() -> Arc<Executor> {
    Executor::from_current()
}

fn region_name(suffix: &str) -> String {
    format!("msgpack-rpc-it-{}-{}", std::process::id(), suffix)
}

async fn start_echo_add_server(name: &str) -> Arc<Server> {
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
    let uri = Uri::parse(&format!("shm://{name}")).unwrap();
    let server = Server::bind(&[uri], MessageParserConfig::default(), processor, executor())
        .await
        .unwrap();
    server.start().unwrap();
    server
}

fn bound_uri(server: &Server) -> Uri {
    match server.local_addresses().into_iter().next().unwrap() {
        Address::Shm(name) => Uri::parse(&format!("shm://{name}")).unwrap(),
        other => panic!("expected a shm address, got {other:?}"),
    }
}

#[tokio::test]
async fn request_response_round_trip() {
    let name = region_name("reqresp");
    let server = start_echo_add_server(&name).await;
    let uri = bound_uri(&server);

    let client = Client::new(
        vec![uri],
        MessageParserConfig::default(),
        ReconnectConfig::default(),
        executor(),
    );
    client.start();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let sum: i64 = client.call("add", (2_i32, 3_i32)).await.unwrap();
    assert_eq!(sum, 5);

    client.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn notification_is_one_way() {
    let name = region_name("notify");
    let server = start_echo_add_server(&name).await;
    let uri = bound_uri(&server);

    let client = Client::new(
        vec![uri],
        MessageParserConfig::default(),
        ReconnectConfig::default(),
        executor(),
    );
    client.start();
    tokio::time::sleep(Duration::from_millis(200)).await;

    client.notify("write", ("hello",)).unwrap();
    let sum: i64 = client.call("add", (1_i32, 1_i32)).await.unwrap();
    assert_eq!(sum, 2);

    client.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn unknown_method_surfaces_as_server_error() {
    let name = region_name("unknownmethod");
    let server = start_echo_add_server(&name).await;
    let uri = bound_uri(&server);

    let client = Client::new(
        vec![uri],
        MessageParserConfig::default(),
        ReconnectConfig::default(),
        executor(),
    );
    client.start();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let err = client.call::<i64, _>("subtract", (5_i32, 3_i32)).await.unwrap_err();
    assert_eq!(err.code(), msgpack_rpc_rs::StatusCode::ServerError);
    assert!(err.message().contains("subtract"));

    client.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn abrupt_client_disconnect_does_not_wedge_the_acceptor() {
    // Shared memory has no byte stream to hand a malformed frame to;
    // the equivalent fault here is one client disappearing without a
    // clean handshake and the acceptor still serving the next one. This
    // exercises the Destroyed/StateChanged event routing directly.
    let name = region_name("disconnect");
    let server = start_echo_add_server(&name).await;
    let uri = bound_uri(&server);

    let first = Client::new(
        vec![uri.clone()],
        MessageParserConfig::default(),
        ReconnectConfig::default(),
        executor(),
    );
    first.start();
    tokio::time::sleep(Duration::from_millis(200)).await;
    let sum: i64 = first.call("add", (1_i32, 2_i32)).await.unwrap();
    assert_eq!(sum, 3);
    first.stop().await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let second = Client::new(
        vec![uri],
        MessageParserConfig::default(),
        ReconnectConfig::default(),
        executor(),
    );
    second.start();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let sum: i64 = second.call("add", (4_i32, 5_i32)).await.unwrap();
    assert_eq!(sum, 9);

    second.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn client_reconnects_after_server_restart() {
    let name = region_name("restart");
    let server = start_echo_add_server(&name).await;
    let uri = bound_uri(&server);

    let client = Client::new(
        vec![uri.clone()],
        MessageParserConfig::default(),
        ReconnectConfig::new(Duration::from_millis(20), Duration::from_millis(200), 2.0).unwrap(),
        executor(),
    );
    client.start();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let sum: i64 = client.call("add", (1_i32, 2_i32)).await.unwrap();
    assert_eq!(sum, 3);

    server.stop().await;
    // Give the client's reconnect loop a moment to notice the drop and
    // release its handle onto the old region before recreating it under
    // the same name.
    tokio::time::sleep(Duration::from_millis(200)).await;
    drop(server);

    let restarted = start_echo_add_server(&name).await;

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
