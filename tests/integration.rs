//! End-to-end tests against an in-process fake broker.
//!
//! The fake speaks just enough of the wire protocol to exercise the
//! client: it consumes the magic + IDENTIFY handshake, acknowledges SUB
//! and PUB, pushes message and heartbeat frames, and observes the
//! FIN/REQ/RDY/NOP traffic the client produces.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};

use nsqling::protocol::{Frame, FrameType, Message, MessageId};
use nsqling::{
    Consumer, ConnectionOptions, Endpoint, ErrorCallback, HandlerError, LookupService,
    MessageContext, MessageHandler, NsqError, ProducerEndpoint, Publisher, SubscriberOptions,
    TopologyManager,
};

/// Capture client logs when a test fails; `RUST_LOG` controls the
/// level. Every test calls this, the first call wins.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn fast_connection_options() -> ConnectionOptions {
    ConnectionOptions {
        initial_backoff: Duration::ZERO,
        response_timeout: Duration::from_millis(500),
        ..ConnectionOptions::default()
    }
}

fn fast_subscriber_options(max_in_flight: usize) -> SubscriberOptions {
    SubscriberOptions {
        connection: fast_connection_options(),
        max_in_flight,
        ..SubscriberOptions::default()
    }
}

async fn bind() -> (TcpListener, Endpoint) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = Endpoint::new("127.0.0.1", listener.local_addr().unwrap().port());
    (listener, endpoint)
}

async fn write_ok(socket: &mut TcpStream) {
    let ok = Frame::new(FrameType::Response, Bytes::from_static(b"OK")).encode();
    socket.write_all(&ok).await.unwrap();
}

/// Consume `  V2` + IDENTIFY, answer OK.
async fn serve_handshake(socket: &mut TcpStream) {
    let mut magic = [0u8; 4];
    socket.read_exact(&mut magic).await.unwrap();
    assert_eq!(&magic, b"  V2");

    assert_eq!(read_line(socket).await, "IDENTIFY");
    let mut len = [0u8; 4];
    socket.read_exact(&mut len).await.unwrap();
    let mut body = vec![0u8; u32::from_be_bytes(len) as usize];
    socket.read_exact(&mut body).await.unwrap();
    write_ok(socket).await;
}

/// Handshake + SUB acknowledgment + initial RDY; returns the RDY line.
async fn serve_subscription(socket: &mut TcpStream) -> String {
    serve_handshake(socket).await;
    assert!(read_line(socket).await.starts_with("SUB "));
    write_ok(socket).await;
    let rdy = read_line(socket).await;
    assert!(rdy.starts_with("RDY "));
    rdy
}

async fn read_line(socket: &mut TcpStream) -> String {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        socket.read_exact(&mut byte).await.unwrap();
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
    }
    String::from_utf8(line).unwrap()
}

async fn deliver(socket: &mut TcpStream, id: &[u8; 16], attempts: u16, body: &[u8]) {
    let message = Message {
        timestamp: 1_700_000_000_000_000_000,
        attempts,
        id: MessageId(*id),
        body: Bytes::copy_from_slice(body),
    };
    let frame = Frame::new(FrameType::Message, message.encode());
    socket.write_all(&frame.encode()).await.unwrap();
}

async fn send_heartbeat(socket: &mut TcpStream) {
    let frame = Frame::new(FrameType::Response, Bytes::from_static(b"_heartbeat_")).encode();
    socket.write_all(&frame).await.unwrap();
}

/// Publish one message, watch it arrive on a subscription, and observe
/// the FIN after the handler settles it.
#[tokio::test]
async fn test_publish_consume_finish_round_trip() {
    init_tracing();
    let (listener, endpoint) = bind().await;

    let broker = tokio::spawn(async move {
        // First session: the consumer.
        let (mut sub, _) = listener.accept().await.unwrap();
        serve_subscription(&mut sub).await;

        // Second session: the publisher.
        let (mut pubsock, _) = listener.accept().await.unwrap();
        serve_handshake(&mut pubsock).await;
        assert_eq!(read_line(&mut pubsock).await, "PUB orders");
        let mut len = [0u8; 4];
        pubsock.read_exact(&mut len).await.unwrap();
        let mut body = vec![0u8; u32::from_be_bytes(len) as usize];
        pubsock.read_exact(&mut body).await.unwrap();
        write_ok(&mut pubsock).await;

        // Route the published body to the subscription.
        deliver(&mut sub, b"feedbeeffeedbeef", 1, &body).await;
        assert_eq!(read_line(&mut sub).await, "FIN feedbeeffeedbeef");
        body
    });

    let consumer = Consumer::new(
        endpoint.clone(),
        "orders".into(),
        "billing".into(),
        &fast_subscriber_options(1),
    );
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handler: MessageHandler = Arc::new(move |ctx: MessageContext| {
        let tx = tx.clone();
        Box::pin(async move {
            tx.send(ctx.body_utf8().into_owned()).unwrap();
            ctx.finish().await?;
            Ok(())
        })
    });
    consumer.start(handler, None).await.unwrap();

    let publisher = Publisher::new(endpoint, fast_connection_options());
    publisher.publish("orders", &b"order #42"[..]).await.unwrap();

    assert_eq!(rx.recv().await.unwrap(), "order #42");
    assert_eq!(broker.await.unwrap(), b"order #42");
}

/// A handler that always requeues: the broker sees one REQ per allowed
/// attempt, then the local ceiling trips and the handler finishes the
/// message instead.
#[tokio::test]
async fn test_requeue_until_ceiling_then_finish() {
    init_tracing();
    const MAX_RETRIES: u16 = 5;
    let (listener, endpoint) = bind().await;

    let broker = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        serve_subscription(&mut socket).await;

        for attempt in 1..=MAX_RETRIES {
            deliver(&mut socket, b"0123456789abcdef", attempt, b"poison").await;
            assert_eq!(
                read_line(&mut socket).await,
                "REQ 0123456789abcdef 0",
                "attempt {attempt} should requeue",
            );
        }

        // One past the ceiling: no REQ may arrive, only the FIN.
        deliver(&mut socket, b"0123456789abcdef", MAX_RETRIES + 1, b"poison").await;
        assert_eq!(read_line(&mut socket).await, "FIN 0123456789abcdef");
    });

    let options = SubscriberOptions {
        max_retry_attempts: MAX_RETRIES,
        ..fast_subscriber_options(1)
    };
    let consumer = Consumer::new(endpoint, "orders".into(), "billing".into(), &options);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handler: MessageHandler = Arc::new(move |ctx: MessageContext| {
        let tx = tx.clone();
        Box::pin(async move {
            match ctx.requeue().await {
                Ok(()) => Ok(()),
                Err(NsqError::RequeueLimitExceeded { attempts, max }) => {
                    tx.send((attempts, max)).unwrap();
                    ctx.finish().await?;
                    Ok(())
                }
                Err(e) => Err(HandlerError::Nsq(e)),
            }
        })
    });
    consumer.start(handler, None).await.unwrap();

    assert_eq!(rx.recv().await.unwrap(), (MAX_RETRIES + 1, MAX_RETRIES));
    broker.await.unwrap();
}

/// Heartbeats must be answered from the read loop even while a slow
/// handler holds every concurrency slot.
#[tokio::test]
async fn test_heartbeats_answered_while_handler_is_busy() {
    init_tracing();
    const HEARTBEATS: usize = 3;
    let (listener, endpoint) = bind().await;
    let release = Arc::new(Notify::new());

    let broker = {
        let release = release.clone();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            serve_subscription(&mut socket).await;

            // Occupy the only handler slot.
            deliver(&mut socket, b"0123456789abcdef", 1, b"slow").await;

            for _ in 0..HEARTBEATS {
                send_heartbeat(&mut socket).await;
                let mut nop = [0u8; 4];
                socket.read_exact(&mut nop).await.unwrap();
                assert_eq!(&nop, b"NOP\n");
            }

            release.notify_one();
            assert_eq!(read_line(&mut socket).await, "FIN 0123456789abcdef");
        })
    };

    let consumer = Consumer::new(
        endpoint,
        "orders".into(),
        "billing".into(),
        &fast_subscriber_options(1),
    );
    let handler: MessageHandler = {
        let release = release.clone();
        Arc::new(move |ctx: MessageContext| {
            let release = release.clone();
            Box::pin(async move {
                release.notified().await;
                ctx.finish().await?;
                Ok(())
            })
        })
    };
    consumer.start(handler, None).await.unwrap();
    broker.await.unwrap();
}

/// Burst arrival: the read loop keeps draining but handler concurrency
/// never exceeds max_in_flight, and every message still gets settled.
#[tokio::test]
async fn test_burst_is_bounded_and_lossless() {
    init_tracing();
    const BURST: usize = 10;
    const MAX_IN_FLIGHT: usize = 3;
    let (listener, endpoint) = bind().await;

    let broker = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        serve_subscription(&mut socket).await;

        for i in 0..BURST {
            let mut id = *b"burst-0000000000";
            id[6] = b'0' + i as u8;
            deliver(&mut socket, &id, 1, b"x").await;
        }
       for _ in 0..BURST {
            assert!(read_line(&mut socket).await.starts_with("FIN burst-"));
        }
    });

    let consumer = Consumer::new(
        endpoint,
        "orders".into(),
        "billing".into(),
        &fast_subscriber_options(MAX_IN_FLIGHT),
    );

    let running = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));
    let handler: MessageHandler = {
        let running = running.clone();
        let max_seen = max_seen.clone();
        Arc::new(move |ctx: MessageContext| {
            let running = running.clone();
            let max_seen = max_seen.clone();
            Box::pin(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                ctx.finish().await?;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
        })
    };
    consumer.start(handler, None).await.unwrap();

    broker.await.unwrap();
    assert!(
        max_seen.load(Ordering::SeqCst) <= MAX_IN_FLIGHT,
        "observed {} concurrent handlers",
        max_seen.load(Ordering::SeqCst),
    );
}

/// When the broker hangs up, the topology's next pass re-subscribes on
/// a fresh session and delivery resumes.
#[tokio::test]
async fn test_resubscribes_after_session_drop() {
    init_tracing();
    let (listener, endpoint) = bind().await;

    let broker = tokio::spawn(async move {
        // Session 1: subscribe, then hang up.
        let (mut first, _) = listener.accept().await.unwrap();
        serve_subscription(&mut first).await;
        drop(first);

        // Session 2: the restarted consumer re-subscribes; deliver.
        let (mut second, _) = listener.accept().await.unwrap();
        serve_subscription(&mut second).await;
        deliver(&mut second, b"0123456789abcdef", 1, b"again").await;
        assert_eq!(read_line(&mut second).await, "FIN 0123456789abcdef");
    });

    let options = SubscriberOptions {
        nsqd_endpoints: vec![endpoint],
        reconcile_interval: Duration::from_millis(100),
        ..fast_subscriber_options(1)
    };
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handler: MessageHandler = Arc::new(move |ctx: MessageContext| {
        let tx = tx.clone();
        Box::pin(async move {
            tx.send(ctx.body_utf8().into_owned()).unwrap();
            ctx.finish().await?;
            Ok(())
        })
    });
    let manager = TopologyManager::new("orders".into(), "billing".into(), options, None, handler, None);
    manager.start().await;

    assert_eq!(rx.recv().await.unwrap(), "again");
    broker.await.unwrap();
    manager.stop().await;
}

/// Lookup stub whose answer can be rewritten between reconcile passes.
struct MutableLookup {
    producers: std::sync::Mutex<Vec<ProducerEndpoint>>,
}

#[async_trait::async_trait]
impl LookupService for MutableLookup {
    async fn producers(
        &self,
        _endpoint: &str,
        _topic: &str,
    ) -> nsqling::Result<Vec<ProducerEndpoint>> {
        Ok(self.producers.lock().unwrap().clone())
    }
}

/// A broker that serves any number of subscription sessions until its
/// task is dropped.
async fn spawn_auto_broker() -> (Endpoint, tokio::task::JoinHandle<()>) {
    let (listener, endpoint) = bind().await;
    let task = tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                serve_subscription(&mut socket).await;
                // Drain settle commands until CLS or hangup.
                loop {
                    let mut byte = [0u8; 1];
                    let mut line = Vec::new();
                    loop {
                        if socket.read_exact(&mut byte).await.is_err() {
                            return;
                        }
                        if byte[0] == b'\n' {
                            break;
                        }
                        line.push(byte[0]);
                    }
                    if line == b"CLS" {
                        return;
                    }
                }
            });
        }
    });
    (endpoint, task)
}

fn producer_for(endpoint: &Endpoint) -> ProducerEndpoint {
    ProducerEndpoint {
        hostname: endpoint.host.clone(),
        broadcast_address: None,
        tcp_port: endpoint.port,
    }
}

/// Discovery shrinks from four brokers to two: the topology must stop
/// exactly the vanished consumers and keep the surviving ones live.
#[tokio::test]
async fn test_topology_follows_shrinking_discovery() {
    init_tracing();
    let mut brokers = Vec::new();
    for _ in 0..4 {
        brokers.push(spawn_auto_broker().await);
    }
    let endpoints: Vec<Endpoint> = brokers.iter().map(|(e, _)| e.clone()).collect();

    let lookup = Arc::new(MutableLookup {
        producers: std::sync::Mutex::new(endpoints.iter().map(producer_for).collect()),
    });

    let options = SubscriberOptions {
        // Long interval: passes are driven manually below.
        reconcile_interval: Duration::from_secs(3600),
        ..fast_subscriber_options(1)
    };
    let handler: MessageHandler = Arc::new(|_ctx: MessageContext| Box::pin(async { Ok(()) }));
    let errors = Arc::new(AtomicUsize::new(0));
    let on_error: ErrorCallback = {
        let errors = errors.clone();
        Arc::new(move |_e| {
            errors.fetch_add(1, Ordering::SeqCst);
        })
    };

    let manager = TopologyManager::new(
        "orders".into(),
        "billing".into(),
        options,
        Some(lookup.clone()),
        handler,
        Some(on_error),
    );
    manager.start().await;
    assert_eq!(manager.consumer_count().await, 4);
    assert_eq!(manager.live_consumer_count().await, 4);

    // Discovery now advertises only the first two brokers.
    *lookup.producers.lock().unwrap() = endpoints[..2].iter().map(producer_for).collect();
    manager.reconcile().await;

    assert_eq!(manager.consumer_count().await, 2);
    assert_eq!(manager.live_consumer_count().await, 2);
    assert_eq!(errors.load(Ordering::SeqCst), 0);

    manager.stop().await;
    assert_eq!(manager.consumer_count().await, 0);
}
