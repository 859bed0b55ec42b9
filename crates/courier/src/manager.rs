use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use courier_codec::{Codec, Packet, Value};
use tracing::{debug, warn};

use crate::{
    address::Address,
    error::{ManagerError, ServerError},
    server::{Server, ServerConfig, lock},
};

/// Handler for one request name. Gets the inbound packet (with the peer
/// address injected under `"addr"`) and produces the reply, or `None` for
/// no reply.
pub type RequestFn = Arc<dyn Fn(Packet) -> Option<Packet> + Send + Sync>;

pub const DEFAULT_REQUEST_HEADER: &str = "RequestType";

/// A server that routes inbound packets to named handlers.
///
/// Owns a [`Server`] whose tick callback reads a header field out of each
/// packet (default `"RequestType"`), runs the matching subscribed handler,
/// and sends the handler's reply back to the originating peer. Reply
/// failures are warned about and swallowed; the disconnect sentinel is
/// ignored.
pub struct RequestManagerServer {
    server: Server,
    requests: Arc<Mutex<HashMap<String, RequestFn>>>,
    header_key: String,
}

impl RequestManagerServer {
    pub fn bind(address: Address, codec: Codec, config: ServerConfig) -> Result<Self, ServerError> {
        Self::bind_with_header(address, codec, DEFAULT_REQUEST_HEADER, config)
    }

    pub fn bind_with_header(
        address: Address,
        codec: Codec,
        header_key: impl Into<String>,
        config: ServerConfig,
    ) -> Result<Self, ServerError> {
        let requests: Arc<Mutex<HashMap<String, RequestFn>>> = Arc::default();
        let header_key = header_key.into();

        let table = Arc::clone(&requests);
        let key = header_key.clone();
        let server = Server::bind(
            address,
            codec,
            move |server, peer, packet| handle_request(server, &table, &key, peer, packet),
            config,
        )?;
        Ok(Self { server, requests, header_key })
    }

    /// Route packets whose header equals `name` to `handler`.
    pub fn subscribe(
        &self,
        name: impl Into<String>,
        handler: RequestFn,
    ) -> Result<(), ManagerError> {
        let name = name.into();
        let mut requests = lock(&self.requests);
        if requests.contains_key(&name) {
            return Err(ManagerError::AlreadySubscribed(name));
        }
        requests.insert(name, handler);
        Ok(())
    }

    /// Remove the handler for `name`. Passing the handler makes the call
    /// strict: it must be the one subscribed or nothing is removed.
    pub fn unsubscribe(
        &self,
        name: &str,
        handler: Option<&RequestFn>,
    ) -> Result<(), ManagerError> {
        let mut requests = lock(&self.requests);
        let Some(current) = requests.get(name) else {
            return Err(ManagerError::NotSubscribed(name.to_owned()));
        };
        if let Some(expected) = handler {
            if !Arc::ptr_eq(current, expected) {
                return Err(ManagerError::HandlerMismatch(name.to_owned()));
            }
        }
        requests.remove(name);
        Ok(())
    }

    /// Run the handler subscribed under `name`, if any.
    pub fn post(&self, name: &str, packet: Packet) -> Option<Packet> {
        let handler = lock(&self.requests).get(name).cloned();
        handler.and_then(|handler| handler(packet))
    }

    /// Best-effort reply to a peer; failures are warned and swallowed.
    pub fn reply(&self, peer: &Address, response: &Packet) {
        if let Err(err) = self.server.send(peer, response) {
            warn!(%err, %peer, "request: reply failed");
        }
    }

    pub fn header_key(&self) -> &str {
        &self.header_key
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    pub fn operate(&self) -> Result<&Self, ServerError> {
        self.server.operate()?;
        Ok(self)
    }

    pub fn blocking_operate(&self) -> Result<(), ServerError> {
        self.server.blocking_operate()
    }

    pub fn send(&self, peer: &Address, packet: &Packet) -> Result<(), ServerError> {
        self.server.send(peer, packet)
    }

    pub fn close(&self) {
        self.server.close();
    }
}

fn handle_request(
    server: &Server,
    requests: &Mutex<HashMap<String, RequestFn>>,
    header_key: &str,
    peer: Address,
    packet: Option<Packet>,
) {
    let Some(mut packet) = packet else {
        return;
    };
    let Some(header) = packet.get(header_key).and_then(Value::as_str).map(str::to_owned) else {
        warn!(%peer, header_key, "request: packet carries no request header");
        return;
    };
    packet.insert("addr".into(), serde_json::json!([peer.host.clone(), peer.port]));

    let handler = lock(requests).get(&header).cloned();
    match handler.and_then(|handler| handler(packet)) {
        Some(response) => {
            if let Err(err) = server.send(&peer, &response) {
                warn!(%err, %peer, "request: reply failed");
            }
        }
        None => debug!(%peer, request = %header, "request: no handler produced a response"),
    }
}
