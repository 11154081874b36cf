//! Subscription cancellation: session close resolves every pending
//! subscription with an error, exactly once.

mod common;

use common::{free_port, Runner, Simple, TestProto};
use protomux_client::ProtoClient;
use protomux_proto::Cancelled;
use protomux_server::{Conn, Context, Module, ModuleRegistry};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn wait_for(cond: impl Fn() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

fn wait_listening(port: u16) {
    for _ in 0..2000 {
        if std::net::TcpStream::connect(("127.0.0.1", port)).is_ok() {
            return;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    panic!("port {port} never started listening");
}

/// Closes the client connection as its answer to any probe.
struct DropServer;

impl Module for DropServer {
    type Protocol = TestProto;

    fn register(reg: &mut ModuleRegistry<Self>) {
        reg.on(|_m: &mut Self, cx: &mut Context<Self>, conn, _msg: Simple| {
            cx.close(conn);
        });
    }
}

/// Subscribes upstream on every probe and records how each subscription
/// resolves.
struct SubscribingProxy {
    upstream_port: u16,
    upstream: Option<Conn>,
    ok: Arc<AtomicUsize>,
    cancelled: Arc<AtomicUsize>,
}

impl Module for SubscribingProxy {
    type Protocol = TestProto;

    fn register(reg: &mut ModuleRegistry<Self>) {
        reg.on(|proxy: &mut Self, cx: &mut Context<Self>, _conn, msg: Simple| {
            let Some(upstream) = proxy.upstream else {
                return;
            };
            let ok = proxy.ok.clone();
            let cancelled = proxy.cancelled.clone();
            cx.subscribe::<Simple, _>(upstream, move |_m, _cx, _reply, result| match result {
                Ok(()) => {
                    ok.fetch_add(1, Ordering::SeqCst);
                }
                Err(Cancelled) => {
                    cancelled.fetch_add(1, Ordering::SeqCst);
                }
            });
            cx.send_message(upstream, &msg);
        });
    }

    fn on_initialized(&mut self, cx: &mut Context<Self>) {
        self.upstream = cx.connect_to_server("127.0.0.1", self.upstream_port).ok();
    }
}

#[test]
fn upstream_close_cancels_pending_subscription() {
    // the upstream answers a probe by closing the connection; the proxy's
    // subscription must resolve exactly once, as cancelled
    let upstream_port = free_port();
    let _upstream = Runner::start(|| DropServer, upstream_port);
    wait_listening(upstream_port);

    let proxy_port = free_port();
    let cancelled = Arc::new(AtomicUsize::new(0));
    let ok = Arc::new(AtomicUsize::new(0));
    let _proxy = Runner::start(
        {
            let ok = ok.clone();
            let cancelled = cancelled.clone();
            move || SubscribingProxy {
                upstream_port,
                upstream: None,
                ok,
                cancelled,
            }
        },
        proxy_port,
    );

    let mut client: ProtoClient<TestProto> = ProtoClient::new();
    client.wait_connect(("127.0.0.1", proxy_port));
    client.send(&Simple { timestamp: 1 }).unwrap();

    assert!(wait_for(
        || cancelled.load(Ordering::SeqCst) == 1,
        Duration::from_secs(5)
    ));
    // give a late duplicate every chance to show up
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    assert_eq!(ok.load(Ordering::SeqCst), 0);
}

/// Subscribes on a connection that never establishes.
struct DeadUpstreamModule {
    cancelled: Arc<AtomicUsize>,
}

impl Module for DeadUpstreamModule {
    type Protocol = TestProto;

    fn on_initialized(&mut self, cx: &mut Context<Self>) {
        // nothing listens on this port, so the session is never connected
        let conn = cx
            .async_connect("127.0.0.1", 1)
            .expect("loopback address parses");
        let cancelled = self.cancelled.clone();
        cx.subscribe::<Simple, _>(conn, move |_m, _cx, _reply, result| {
            assert_eq!(result, Err(Cancelled));
            cancelled.fetch_add(1, Ordering::SeqCst);
        });
    }
}

#[test]
fn subscription_without_connection_cancels_immediately() {
    let port = free_port();
    let cancelled = Arc::new(AtomicUsize::new(0));
    let _server = Runner::start(
        {
            let cancelled = cancelled.clone();
            move || DeadUpstreamModule { cancelled }
        },
        port,
    );

    assert!(wait_for(
        || cancelled.load(Ordering::SeqCst) == 1,
        Duration::from_secs(5)
    ));
}
