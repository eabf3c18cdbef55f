//! Contract tests both transports must satisfy. The in-process transport
//! runs unconditionally; the AMQP transport runs the same scenarios behind
//! `#[ignore]` so the suite passes without a live broker
//! (`cargo test -- --ignored` with RabbitMQ up exercises them).

use std::sync::Arc;
use std::time::Duration;

use messaging::{
    broker_url, AmqpClient, AmqpClientOptions, AmqpServer, AmqpServerOptions, InprocServer,
    RpcClient, RpcServer, TransportError,
};
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Replies to every request with `echo:<body>`, optionally after a delay.
fn spawn_echo_server<S>(server: Arc<S>, delay: Option<Duration>) -> JoinHandle<()>
where
    S: RpcServer + 'static,
{
    tokio::spawn(async move {
        let stream = match server.listen().await {
            Ok(stream) => stream,
            Err(_) => return,
        };
        while let Some(request) = stream.recv().await {
            let server = Arc::clone(&server);
            tokio::spawn(async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                let mut body = b"echo:".to_vec();
                body.extend_from_slice(&request.data);
                let _ = server.reply(&request.correlation_id, body).await;
            });
        }
    })
}

async fn assert_single_round_trip<C: RpcClient>(client: &C) {
    let reply = client.request(b"test-1".to_vec()).await.unwrap();
    let body = timeout(Duration::from_secs(1), reply)
        .await
        .expect("reply within one second")
        .expect("reply channel completed");
    assert_eq!(body, b"echo:test-1");
}

async fn assert_concurrent_fan_in<C: RpcClient + 'static>(client: Arc<C>) {
    let mut tasks = Vec::new();
    for i in 0..10 {
        let client = Arc::clone(&client);
        tasks.push(tokio::spawn(async move {
            let payload = format!("batch-{i}");
            let reply = client.request(payload.clone().into_bytes()).await.unwrap();
            let body = timeout(Duration::from_secs(1), reply)
                .await
                .expect("reply within one second")
                .expect("reply channel completed");
            assert_eq!(body, format!("echo:{payload}").into_bytes());
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
}

#[tokio::test]
async fn inproc_single_round_trip() {
    let server = Arc::new(InprocServer::new());
    spawn_echo_server(Arc::clone(&server), None);

    let client = server.client(None);
    assert_single_round_trip(&client).await;
}

#[tokio::test]
async fn inproc_concurrent_requests_stay_correlated() {
    let server = Arc::new(InprocServer::new());
    spawn_echo_server(Arc::clone(&server), None);

    let client = Arc::new(server.client(None));
    assert_concurrent_fan_in(client).await;
}

#[tokio::test]
async fn inproc_multiple_clients_route_replies_independently() {
    let server = Arc::new(InprocServer::new());
    spawn_echo_server(Arc::clone(&server), None);

    let first = Arc::new(server.client(None));
    let second = Arc::new(server.client(None));

    let a = tokio::spawn({
        let first = Arc::clone(&first);
        async move {
            let reply = first.request(b"from-first".to_vec()).await.unwrap();
            reply.await.unwrap()
        }
    });
    let b = tokio::spawn({
        let second = Arc::clone(&second);
        async move {
            let reply = second.request(b"from-second".to_vec()).await.unwrap();
            reply.await.unwrap()
        }
    });

    assert_eq!(a.await.unwrap(), b"echo:from-first");
    assert_eq!(b.await.unwrap(), b"echo:from-second");
}

#[tokio::test]
async fn inproc_timeout_closes_reply_channel_empty() {
    let server = Arc::new(InprocServer::new());
    // Replies arrive well after the client gives up.
    spawn_echo_server(Arc::clone(&server), Some(Duration::from_millis(200)));

    let client = server.client(Some(Duration::from_millis(50)));
    let reply = client.request(b"slow".to_vec()).await.unwrap();
    assert!(reply.await.is_err(), "timed-out channel must close empty");

    // The transport stays usable; the late reply for the first request is
    // dropped by the demultiplexer, not delivered to the second.
    let reply = client.request(b"second".to_vec()).await.unwrap();
    let body = timeout(Duration::from_secs(1), reply)
        .await
        .expect("reply within one second")
        .expect("reply channel completed");
    assert_eq!(body, b"echo:second");
}

#[tokio::test]
async fn inproc_request_after_client_close_fails() {
    let server = Arc::new(InprocServer::new());
    spawn_echo_server(Arc::clone(&server), None);

    let client = server.client(None);
    client.close().await.unwrap();
    client.close().await.unwrap(); // idempotent

    let err = client.request(b"x".to_vec()).await.unwrap_err();
    assert!(matches!(err, TransportError::Closed));
}

#[tokio::test]
async fn inproc_server_close_ends_stream_and_rejects_requests() {
    let server = Arc::new(InprocServer::new());
    let stream = server.listen().await.unwrap();
    let client = server.client(None);

    server.close().await.unwrap();

    assert!(stream.recv().await.is_none());
    let err = client.request(b"x".to_vec()).await.unwrap_err();
    assert!(matches!(err, TransportError::Closed));
}

#[tokio::test]
async fn inproc_reply_for_unknown_correlation_fails() {
    let server = InprocServer::new();
    let err = server.reply("never-seen", b"x".to_vec()).await.unwrap_err();
    assert!(matches!(err, TransportError::UnknownCorrelation(_)));
}

// AMQP scenarios. These need a reachable broker (RABBITMQ_URL or the
// default localhost URL) and are therefore ignored by default.

fn test_queue_name(prefix: &str) -> String {
    format!("{prefix}_{}", uuid::Uuid::new_v4().simple())
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn amqp_single_round_trip() {
    let url = broker_url(None);
    let queue = test_queue_name("contract_single");

    let server = Arc::new(
        AmqpServer::connect(&url, queue.clone(), AmqpServerOptions::default())
            .await
            .unwrap(),
    );
    spawn_echo_server(Arc::clone(&server), None);

    let client = AmqpClient::connect(&url, queue, AmqpClientOptions::default())
        .await
        .unwrap();
    assert_single_round_trip(&client).await;

    client.close().await.unwrap();
    server.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn amqp_concurrent_requests_stay_correlated() {
    let url = broker_url(None);
    let queue = test_queue_name("contract_fan_in");

    let server = Arc::new(
        AmqpServer::connect(&url, queue.clone(), AmqpServerOptions::default())
            .await
            .unwrap(),
    );
    spawn_echo_server(Arc::clone(&server), None);

    let client = Arc::new(
        AmqpClient::connect(&url, queue, AmqpClientOptions::default())
            .await
            .unwrap(),
    );
    assert_concurrent_fan_in(Arc::clone(&client)).await;

    client.close().await.unwrap();
    server.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn amqp_timeout_closes_reply_channel_empty() {
    let url = broker_url(None);
    let queue = test_queue_name("contract_timeout");

    let server = Arc::new(
        AmqpServer::connect(&url, queue.clone(), AmqpServerOptions::default())
            .await
            .unwrap(),
    );
    spawn_echo_server(Arc::clone(&server), Some(Duration::from_millis(500)));

    let client = AmqpClient::connect(
        &url,
        queue,
        AmqpClientOptions {
            request_timeout: Some(Duration::from_millis(100)),
        },
    )
    .await
    .unwrap();

    let reply = client.request(b"slow".to_vec()).await.unwrap();
    assert!(reply.await.is_err(), "timed-out channel must close empty");

    let reply = client.request(b"second".to_vec()).await.unwrap();
    let body = timeout(Duration::from_secs(2), reply)
        .await
        .expect("reply within two seconds")
        .expect("reply channel completed");
    assert_eq!(body, b"echo:second");

    client.close().await.unwrap();
    server.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn amqp_request_after_close_fails() {
    let url = broker_url(None);
    let queue = test_queue_name("contract_closed");

    let server = AmqpServer::connect(&url, queue.clone(), AmqpServerOptions::default())
        .await
        .unwrap();
    let client = AmqpClient::connect(&url, queue, AmqpClientOptions::default())
        .await
        .unwrap();

    client.close().await.unwrap();
    client.close().await.unwrap(); // idempotent

    let err = client.request(b"x".to_vec()).await.unwrap_err();
    assert!(matches!(err, TransportError::Closed));

    server.close().await.unwrap();
}
