use std::{
    net::{Shutdown, TcpStream},
    time::Duration,
};

use courier_codec::{Codec, Packet};
use tracing::debug;

use crate::{address::Address, error::ClientError};

/// Client lifecycle: `Idle -> Connected -> Closed`. Everything but
/// `connect` and `close` requires `Connected`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Connected,
    Closed,
}

/// Synchronous counterpart to the server: one socket, blocking
/// send/recv/request. No background threads.
///
/// ```no_run
/// # use courier::{Address, Client, Options, Packet, load_default_protocol};
/// let codec = load_default_protocol(&Options::new())?;
/// let mut client = Client::new(Address::new("127.0.0.1", 48_575), codec);
/// client.connect()?;
/// let reply = client.request(&Packet::new())?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Client {
    address: Address,
    codec: Codec,
    timeout: Duration,
    stream: Option<TcpStream>,
    state: ClientState,
}

impl Client {
    pub fn new(address: Address, codec: Codec) -> Self {
        Self {
            address,
            codec,
            timeout: Duration::from_secs(10),
            stream: None,
            state: ClientState::Idle,
        }
    }

    /// Cap how long a `recv` blocks before erroring out.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn connected(&self) -> bool {
        self.state == ClientState::Connected
    }

    pub fn closed(&self) -> bool {
        self.state == ClientState::Closed
    }

    /// Open the TCP connection and transition to `Connected`.
    pub fn connect(&mut self) -> Result<&mut Self, ClientError> {
        let stream = TcpStream::connect(&self.address)?;
        stream.set_read_timeout(Some(self.timeout))?;
        self.stream = Some(stream);
        self.state = ClientState::Connected;
        Ok(self)
    }

    /// Send one packet. Encode failures surface as
    /// [`ClientError::Malformed`] and leave the connection usable.
    pub fn send(&mut self, packet: &Packet) -> Result<(), ClientError> {
        let stream = self.connected_stream()?;
        let mut writer = stream;
        self.codec.send(&mut writer, packet).map_err(ClientError::from)
    }

    /// Block for the next reply. `Ok(None)` means the peer sent something
    /// undecodable or went away; a reset mid-read is folded into the same
    /// outcome rather than raised.
    pub fn recv(&mut self) -> Result<Option<Packet>, ClientError> {
        let stream = self.connected_stream()?;
        let mut reader = stream;
        match self.codec.recv(&mut reader) {
            Ok(packet) => Ok(packet),
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::ConnectionAborted
                ) =>
            {
                debug!(%err, "client: connection dropped mid-receive");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// `send` then `recv`.
    pub fn request(&mut self, packet: &Packet) -> Result<Option<Packet>, ClientError> {
        self.send(packet)?;
        self.recv()
    }

    /// Transition to `Closed` and drop the socket. Idempotent.
    pub fn close(&mut self) {
        self.state = ClientState::Closed;
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    fn connected_stream(&self) -> Result<&TcpStream, ClientError> {
        if self.state != ClientState::Connected {
            return Err(ClientError::NotConnected(self.state));
        }
        self.stream.as_ref().ok_or(ClientError::NotConnected(self.state))
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}
