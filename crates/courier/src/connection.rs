use std::{
    net::{Shutdown, TcpStream},
    sync::atomic::{AtomicBool, Ordering},
};

use courier_codec::{Codec, Packet, SendError};
use crossbeam_channel::Sender;
use tracing::debug;

use crate::address::Address;

/// One entry on the server's inbound queue.
///
/// `Gone` is the disconnect sentinel: a worker posts exactly one before it
/// exits, whether the peer hung up, sent an undecodable frame, or the
/// server closed the socket from under it.
#[derive(Debug)]
pub enum Delivery {
    Message { peer: Address, packet: Packet },
    Gone { peer: Address },
}

/// Server-side half of one accepted socket. Owned by the server's
/// connection map; its receive loop runs on a dedicated worker thread.
pub(crate) struct Connection {
    stream: TcpStream,
    codec: Codec,
    peer: Address,
    inbound: Sender<Delivery>,
    closed: AtomicBool,
}

impl Connection {
    pub(crate) fn new(
        stream: TcpStream,
        codec: Codec,
        peer: Address,
        inbound: Sender<Delivery>,
    ) -> Self {
        Self { stream, codec, peer, inbound, closed: AtomicBool::new(false) }
    }

    pub(crate) fn peer(&self) -> &Address {
        &self.peer
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Send a packet unless the connection is already closed; reports
    /// whether the packet went out. Encode failures propagate and leave
    /// the connection open.
    pub(crate) fn send(&self, packet: &Packet) -> Result<bool, SendError> {
        if self.is_closed() {
            return Ok(false);
        }
        let mut writer = &self.stream;
        self.codec.send(&mut writer, packet)?;
        Ok(true)
    }

    /// Flip the closed flag and shut the socket down, unblocking a reader
    /// mid-receive. Safe to call from any thread, any number of times.
    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    /// Receive loop. Posts one `Delivery::Message` per decoded packet and
    /// exactly one `Delivery::Gone` before returning.
    ///
    /// The closed flag is read without the sender's lock, so one receive
    /// attempt may start after a close; it errors out against the shut-down
    /// socket and lands in the sentinel path like any other disconnect.
    pub(crate) fn run(&self) {
        while !self.is_closed() {
            let mut reader = &self.stream;
            match self.codec.recv(&mut reader) {
                Ok(Some(packet)) => {
                    let _ = self.inbound.send(Delivery::Message { peer: self.peer.clone(), packet });
                }
                Ok(None) => {
                    self.finish();
                    return;
                }
                Err(err) => {
                    if !self.is_closed() {
                        debug!(%err, peer = %self.peer, "connection: receive failed");
                    }
                    self.finish();
                    return;
                }
            }
        }
        self.finish();
    }

    fn finish(&self) {
        let _ = self.inbound.send(Delivery::Gone { peer: self.peer.clone() });
        self.close();
    }
}
