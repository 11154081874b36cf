//! Subprotocol interop: a subset-view client against a full-protocol
//! server.

mod common;

use common::{free_port, Runner, Simple, Type1, Type4, Type6, Type6Only, TestProto};
use protomux_client::ProtoClient;
use protomux_server::{Module, ModuleRegistry};

/// Echoes every type of the full protocol.
struct FullEcho;

impl Module for FullEcho {
    type Protocol = TestProto;

    fn register(reg: &mut ModuleRegistry<Self>) {
        reg.on_reply(|_m: &mut Self, _cx, _conn, msg: Simple| msg);
        reg.on_reply(|_m: &mut Self, _cx, _conn, msg: Type1| msg);
        reg.on_reply(|_m: &mut Self, _cx, _conn, msg: Type4| msg);
        reg.on_reply(|_m: &mut Self, _cx, _conn, msg: Type6| msg);
    }
}

#[test]
fn subset_client_speaks_parent_tags() {
    // S3: the subprotocol client's tags line up with the server's
    let port = free_port();
    let _server = Runner::start(|| FullEcho, port);

    let mut client: ProtoClient<Type6Only> = ProtoClient::new();
    client.wait_connect(("127.0.0.1", port));

    client
        .send(&Type6 {
            data: "hello world".into(),
        })
        .unwrap();
    let reply: Type6 = client.wait_message().unwrap();
    assert_eq!(reply.data, "hello world");
}

#[test]
fn full_and_subset_clients_coexist() {
    let port = free_port();
    let _server = Runner::start(|| FullEcho, port);

    let mut full: ProtoClient<TestProto> = ProtoClient::new();
    full.wait_connect(("127.0.0.1", port));
    let mut subset: ProtoClient<Type6Only> = ProtoClient::new();
    subset.wait_connect(("127.0.0.1", port));

    full.send(&Type1 { data: 7 }).unwrap();
    subset.send(&Type6 { data: "sub".into() }).unwrap();

    assert_eq!(full.wait_message::<Type1>().unwrap().data, 7);
    assert_eq!(subset.wait_message::<Type6>().unwrap().data, "sub");
}
