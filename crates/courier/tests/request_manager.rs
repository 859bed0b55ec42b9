mod common;

use std::{sync::Arc, time::Duration};

use courier::{
    Address, ClientError, Options, Packet, RequestFn, RequestManagerServer, ServerConfig,
    load_protocol,
};

use crate::common::{as_packet, client_for};

fn manager() -> RequestManagerServer {
    RequestManagerServer::bind(
        Address::new("127.0.0.1", 0),
        load_protocol("msgpack", &Options::new()).expect("codec loads"),
        ServerConfig::default(),
    )
    .expect("bind succeeds")
}

#[test]
fn routed_request_returns_the_handler_response() {
    let manager = manager();
    let handler: RequestFn = Arc::new(|packet: Packet| {
        let kw1 = packet.get("kw1")?.as_i64()?;
        let kw2 = packet.get("kw2")?.as_i64()?;
        let mut response = Packet::new();
        response.insert("response".into(), (kw1 + kw2).into());
        Some(response)
    });
    manager.subscribe("TestRequest", handler).unwrap();
    manager.operate().unwrap();

    let mut client = client_for(manager.server(), "msgpack");
    client.connect().unwrap();
    let request = as_packet(serde_json::json!({"RequestType": "TestRequest", "kw1": 7, "kw2": 4}));
    let reply = client.request(&request).unwrap();
    assert_eq!(reply, Some(as_packet(serde_json::json!({"response": 11}))));
}

#[test]
fn handlers_see_the_injected_peer_address() {
    let manager = manager();
    let handler: RequestFn = Arc::new(|packet: Packet| Some(packet));
    manager.subscribe("Echo", handler).unwrap();
    manager.operate().unwrap();

    let mut client = client_for(manager.server(), "msgpack");
    client.connect().unwrap();
    let reply = client
        .request(&as_packet(serde_json::json!({"RequestType": "Echo"})))
        .unwrap()
        .expect("reply arrives");

    let addr = reply["addr"].as_array().expect("addr injected");
    assert_eq!(addr[0].as_str(), Some("127.0.0.1"));
    assert!(addr[1].as_u64().is_some_and(|port| port > 0));
}

#[test]
fn unrouted_requests_get_no_reply() {
    let manager = manager();
    manager.operate().unwrap();

    let mut client =
        client_for(manager.server(), "msgpack").with_timeout(Duration::from_millis(300));
    client.connect().unwrap();
    client.send(&as_packet(serde_json::json!({"RequestType": "Nobody"}))).unwrap();
    assert!(matches!(client.recv(), Err(ClientError::Io(_))));
}

#[test]
fn a_custom_header_key_routes() {
    let manager = RequestManagerServer::bind_with_header(
        Address::new("127.0.0.1", 0),
        load_protocol("msgpack", &Options::new()).unwrap(),
        "Op",
        ServerConfig::default(),
    )
    .unwrap();
    assert_eq!(manager.header_key(), "Op");

    let handler: RequestFn = Arc::new(|_| Some(as_packet(serde_json::json!({"ok": true}))));
    manager.subscribe("Ping", handler).unwrap();
    manager.operate().unwrap();

    let mut client = client_for(manager.server(), "msgpack");
    client.connect().unwrap();
    let reply = client.request(&as_packet(serde_json::json!({"Op": "Ping"}))).unwrap();
    assert_eq!(reply, Some(as_packet(serde_json::json!({"ok": true}))));
}

#[test]
fn a_silent_disconnect_does_not_disturb_routing() {
    let manager = manager();
    let handler: RequestFn = Arc::new(|packet: Packet| Some(packet));
    manager.subscribe("Echo", handler).unwrap();
    manager.operate().unwrap();

    let mut ghost = client_for(manager.server(), "msgpack");
    ghost.connect().unwrap();
    ghost.close();
    std::thread::sleep(Duration::from_millis(50));

    let mut client = client_for(manager.server(), "msgpack");
    client.connect().unwrap();
    let reply = client
        .request(&as_packet(serde_json::json!({"RequestType": "Echo", "n": 3})))
        .unwrap()
        .expect("reply arrives");
    assert_eq!(reply["n"].as_i64(), Some(3));
}
