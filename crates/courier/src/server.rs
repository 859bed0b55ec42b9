use std::{
    collections::HashMap,
    io,
    net::TcpListener,
    os::fd::AsRawFd,
    sync::{
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle, ThreadId},
    time::Duration,
};

use courier_codec::{Codec, Packet};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use tracing::{debug, info, warn};

use crate::{
    address::Address,
    connection::{Connection, Delivery},
    error::ServerError,
};

/// Server lifecycle. Valid transitions are `Idle -> Running` (operate) and
/// `Running -> Closed` (close); everything else out of `Running` or
/// `Closed` through the public API is a [`ServerError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    Running,
    Closed,
    /// Reserved; never produced.
    ConnectionOn,
}

/// Callback invoked serially from the dispatch loop, once per inbound
/// packet. `None` is the disconnect sentinel for that peer. Long-running
/// work here stalls all dispatch; replies go out via [`Server::send`].
pub type TickCallback = dyn Fn(&Server, Address, Option<Packet>) + Send + Sync;

/// Tuning knobs for a server, [`TickCallback`] aside.
#[derive(Clone, Copy, Debug)]
pub struct ServerConfig {
    /// Listener receive timeout: how long the accept loop blocks before
    /// waking to observe closure.
    pub timeout: Duration,
    /// Sleep between dispatch ticks that found nothing to do. Zero spins.
    pub delay: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(10), delay: Duration::ZERO }
    }
}

impl ServerConfig {
    pub fn new(timeout: Duration, delay: Duration) -> Self {
        Self { timeout, delay }
    }
}

struct Shared {
    address: Address,
    codec: Codec,
    listener: TcpListener,
    config: ServerConfig,
    callback: Box<TickCallback>,
    state: Mutex<ServerState>,
    state_changed: Condvar,
    /// Claimed once by whichever operate call wins; keeps a second call
    /// from racing a second consumer onto the inbound queue before the
    /// state observably leaves `Idle`.
    operating: AtomicBool,
    connections: Mutex<HashMap<Address, Arc<Connection>>>,
    inbound_tx: Sender<Delivery>,
    inbound_rx: Receiver<Delivery>,
    /// Every thread this server spawned, keyed by thread id so exited
    /// workers can be joined piecemeal.
    threads: Mutex<HashMap<ThreadId, JoinHandle<()>>>,
    /// Ids of worker threads that finished and await a join on an
    /// otherwise-idle dispatch tick.
    exited: Mutex<Vec<ThreadId>>,
}

/// Request/response server over TCP.
///
/// One accept thread pulls new sockets off the listener, one worker thread
/// per connection drains frames into a single inbound queue, and one
/// dispatch thread (or the caller, via [`blocking_operate`]) pops the
/// queue and runs the tick callback. Packets from one peer reach the
/// callback in transmit order; interleaving across peers is arbitrary.
///
/// The value returned by [`bind`] owns the runtime: dropping it closes the
/// server. Clones are non-owning handles for use inside callbacks and
/// other threads.
///
/// [`bind`]: Server::bind
/// [`blocking_operate`]: Server::blocking_operate
pub struct Server {
    shared: Arc<Shared>,
    owner: bool,
}

impl Server {
    /// Bind a listener on `address`. The server starts `Idle`; call
    /// [`operate`](Server::operate) to serve.
    pub fn bind(
        address: Address,
        codec: Codec,
        callback: impl Fn(&Server, Address, Option<Packet>) + Send + Sync + 'static,
        config: ServerConfig,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(&address)
            .map_err(|source| ServerError::Bind { address: address.clone(), source })?;
        set_receive_timeout(&listener, config.timeout);

        let (inbound_tx, inbound_rx) = crossbeam_channel::unbounded();
        Ok(Self {
            shared: Arc::new(Shared {
                address,
                codec,
                listener,
                config,
                callback: Box::new(callback),
                state: Mutex::new(ServerState::Idle),
                state_changed: Condvar::new(),
                operating: AtomicBool::new(false),
                connections: Mutex::new(HashMap::new()),
                inbound_tx,
                inbound_rx,
                threads: Mutex::new(HashMap::new()),
                exited: Mutex::new(Vec::new()),
            }),
            owner: true,
        })
    }

    /// The address the server was asked to bind.
    pub fn address(&self) -> &Address {
        &self.shared.address
    }

    /// The address actually bound, with any OS-assigned port filled in.
    pub fn local_addr(&self) -> io::Result<Address> {
        Ok(self.shared.listener.local_addr()?.into())
    }

    pub fn codec(&self) -> &Codec {
        &self.shared.codec
    }

    pub fn config(&self) -> ServerConfig {
        self.shared.config
    }

    pub fn state(&self) -> ServerState {
        *lock(&self.shared.state)
    }

    pub fn running(&self) -> bool {
        self.state() == ServerState::Running
    }

    pub fn closed(&self) -> bool {
        self.state() == ServerState::Closed
    }

    /// Serve on a background thread; returns once the dispatch loop is
    /// running. `Idle` only, else [`ServerError::InvalidState`].
    pub fn operate(&self) -> Result<&Self, ServerError> {
        self.claim_operation()?;
        let handle = self.handle();
        self.spawn("dispatch", move || {
            match handle.start_accepting() {
                Ok(()) => handle.dispatch_loop(),
                Err(err) => {
                    warn!(%err, "server: could not start the accept loop");
                    // Unblock the operate call waiting on the state change.
                    handle.set_state(ServerState::Closed);
                }
            }
        })?;
        self.wait_until_dispatching();
        Ok(self)
    }

    /// Serve on the calling thread until closed. `Idle` only, else
    /// [`ServerError::InvalidState`].
    pub fn blocking_operate(&self) -> Result<(), ServerError> {
        self.claim_operation()?;
        self.start_accepting()?;
        self.dispatch_loop();
        Ok(())
    }

    /// Send a packet to a connected peer. Unknown peers are a
    /// [`ServerError::UnknownPeer`]; a peer whose connection already died
    /// is silent (its worker surfaces the death as a sentinel).
    pub fn send(&self, peer: &Address, packet: &Packet) -> Result<(), ServerError> {
        // Clone the handle out so the map lock is not held across the
        // blocking socket write.
        let connection = lock(&self.shared.connections)
            .get(peer)
            .cloned()
            .ok_or_else(|| ServerError::UnknownPeer(peer.clone()))?;
        if !connection.send(packet)? {
            debug!(%peer, "server: dropped send to a closed connection");
        }
        Ok(())
    }

    /// Close the listener and every connection, then join every thread the
    /// server spawned. When this returns no worker remains. Idempotent.
    pub fn close(&self) {
        self.set_state(ServerState::Closed);
        wake_listener(&self.shared.listener);

        // The accept thread can race one final connection and worker into
        // the maps while it winds down, so close and join in passes until
        // a pass finds nothing new. Threads are snapshotted before the
        // connections are drained: a worker is only ever spawned after its
        // connection is registered, so every worker in the snapshot has
        // its socket shut down before the join below.
        loop {
            let handles: Vec<JoinHandle<()>> = {
                let mut threads = lock(&self.shared.threads);
                let current = thread::current().id();
                let ids: Vec<ThreadId> =
                    threads.keys().copied().filter(|id| *id != current).collect();
                ids.iter().filter_map(|id| threads.remove(id)).collect()
            };

            let connections: Vec<Arc<Connection>> = {
                let mut map = lock(&self.shared.connections);
                map.drain().map(|(_, connection)| connection).collect()
            };
            for connection in &connections {
                connection.close();
            }

            if connections.is_empty() && handles.is_empty() {
                break;
            }
            for handle in handles {
                let _ = handle.join();
            }
        }
        lock(&self.shared.exited).clear();
        info!(address = %self.shared.address, "server: closed");
    }

    /// Non-owning handle for worker threads and callbacks.
    fn handle(&self) -> Self {
        Self { shared: Arc::clone(&self.shared), owner: false }
    }

    /// Exactly one operate call gets to run the dispatch loop; any other,
    /// and any call on a running or closed server, errors.
    fn claim_operation(&self) -> Result<(), ServerError> {
        let state = self.state();
        if state != ServerState::Idle || self.shared.operating.swap(true, Ordering::SeqCst) {
            return Err(ServerError::InvalidState(state));
        }
        Ok(())
    }

    fn set_state(&self, state: ServerState) {
        *lock(&self.shared.state) = state;
        self.shared.state_changed.notify_all();
    }

    fn wait_until_dispatching(&self) {
        let mut state = lock(&self.shared.state);
        while *state == ServerState::Idle {
            state = self
                .shared
                .state_changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn dispatch_loop(&self) {
        {
            let mut state = lock(&self.shared.state);
            // A close that won the race stays closed.
            if *state == ServerState::Closed {
                return;
            }
            *state = ServerState::Running;
            self.shared.state_changed.notify_all();
        }
        info!(address = %self.shared.address, "server: dispatching");
        while !self.closed() {
            self.tick();
        }
    }

    /// One dispatch step: deliver a queued message if there is one, else
    /// join finished workers, else idle for the configured delay.
    fn tick(&self) {
        match self.shared.inbound_rx.try_recv() {
            Ok(Delivery::Message { peer, packet }) => {
                (self.shared.callback)(self, peer, Some(packet));
            }
            Ok(Delivery::Gone { peer }) => {
                debug!(%peer, "server: peer gone");
                (self.shared.callback)(self, peer, None);
            }
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => {
                if !self.join_exited() {
                    thread::sleep(self.shared.config.delay);
                }
            }
        }
    }

    /// Join every worker that announced its exit; reports whether there
    /// was anything to join.
    fn join_exited(&self) -> bool {
        let ids = {
            let mut exited = lock(&self.shared.exited);
            if exited.is_empty() {
                return false;
            }
            std::mem::take(&mut *exited)
        };
        let handles: Vec<JoinHandle<()>> = {
            let mut threads = lock(&self.shared.threads);
            ids.iter().filter_map(|id| threads.remove(id)).collect()
        };
        for handle in handles {
            let _ = handle.join();
        }
        true
    }

    fn start_accepting(&self) -> Result<(), ServerError> {
        let handle = self.handle();
        self.spawn("accept", move || handle.accept_loop())
    }

    fn accept_loop(&self) {
        while !self.closed() {
            match self.shared.listener.accept() {
                Ok((stream, peer_addr)) => {
                    if self.closed() {
                        drop(stream);
                        break;
                    }
                    let peer = Address::from(peer_addr);
                    debug!(%peer, "server: accepted connection");
                    let connection = Arc::new(Connection::new(
                        stream,
                        self.shared.codec.clone(),
                        peer.clone(),
                        self.shared.inbound_tx.clone(),
                    ));
                    lock(&self.shared.connections).insert(peer, Arc::clone(&connection));
                    if let Err(err) = self.spawn_worker(connection) {
                        warn!(%err, "server: could not spawn a connection worker");
                    }
                }
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::WouldBlock
                            | io::ErrorKind::TimedOut
                            | io::ErrorKind::Interrupted
                    ) => {}
                Err(err) => {
                    // Closure shows up here as an error against the
                    // shut-down listener; anything else is transient.
                    if !self.closed() {
                        debug!(%err, "server: accept failed");
                    }
                }
            }
        }
    }

    fn spawn_worker(&self, connection: Arc<Connection>) -> Result<(), ServerError> {
        let handle = self.handle();
        let name = format!("worker-{}", connection.peer());
        self.spawn(&name, move || {
            connection.run();
            lock(&handle.shared.exited).push(thread::current().id());
        })
    }

    fn spawn(&self, name: &str, run: impl FnOnce() + Send + 'static) -> Result<(), ServerError> {
        let handle = thread::Builder::new().name(format!("courier-{name}")).spawn(run)?;
        lock(&self.shared.threads).insert(handle.thread().id(), handle);
        Ok(())
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if self.owner && !self.closed() {
            self.close();
        }
    }
}

impl Clone for Server {
    fn clone(&self) -> Self {
        self.handle()
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// SO_RCVTIMEO on the listener: accept wakes with `WouldBlock` at this
/// cadence so the accept loop can observe closure even when idle.
fn set_receive_timeout(listener: &TcpListener, timeout: Duration) {
    let timeout = libc::timeval {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_usec: timeout.subsec_micros() as libc::suseconds_t,
    };
    unsafe {
        libc::setsockopt(
            listener.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_RCVTIMEO,
            std::ptr::from_ref(&timeout).cast(),
            size_of::<libc::timeval>() as libc::socklen_t,
        );
    }
}

/// Shut the listening socket down so a blocked accept returns immediately
/// instead of riding out its receive timeout.
fn wake_listener(listener: &TcpListener) {
    unsafe {
        libc::shutdown(listener.as_raw_fd(), libc::SHUT_RDWR);
    }
}
