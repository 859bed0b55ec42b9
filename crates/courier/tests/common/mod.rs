#![allow(dead_code)]

use courier::{Address, Client, Options, Packet, Server, ServerConfig, Value, load_protocol};

/// One packet touching every supported leaf type.
pub fn super_packet() -> Packet {
    as_packet(serde_json::json!({
        "str": "string",
        "int": 2,
        "float": 52.1,
        "list[int]": [1, 5, 2, 4, 6],
        "list[str, int, float]": ["test", 5, 532.25],
        "dict[str, int]": {"1": 1, "2": 2},
        "127": 52
    }))
}

pub fn as_packet(value: Value) -> Packet {
    match value {
        Value::Object(map) => map,
        other => panic!("not a packet: {other}"),
    }
}

pub fn echo(server: &Server, peer: Address, packet: Option<Packet>) {
    if let Some(packet) = packet {
        let _ = server.send(&peer, &packet);
    }
}

/// Echo server on an OS-assigned loopback port.
pub fn echo_server(protocol: &str) -> Server {
    let codec = load_protocol(protocol, &Options::new()).expect("codec loads");
    Server::bind(Address::new("127.0.0.1", 0), codec, echo, ServerConfig::default())
        .expect("bind succeeds")
}

pub fn client_for(server: &Server, protocol: &str) -> Client {
    let addr = server.local_addr().expect("server has a local addr");
    Client::new(addr, load_protocol(protocol, &Options::new()).expect("codec loads"))
}
