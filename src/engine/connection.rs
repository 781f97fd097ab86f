// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The connection engine.
//!
//! A [`ConnectionTemplate`] is an unbound prototype carrying the
//! registered request handlers; the acceptor and the client connector
//! instantiate it once per live socket. A live [`RpcConnection`] owns its
//! socket through two tasks pinned to the connection's reactor loop: the
//! read task feeds the frame decoder and dispatches completed envelopes,
//! the write task drains the double-buffered outbound queue. Both sides
//! of one socket can call and serve at the same time (full duplex).

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    runtime::Handle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    codec::{
        decoder::{DecodeStep, FrameDecoder},
        encoder::encode_frame,
        envelope::Envelope,
    },
    engine::{
        dispatch::{DispatchTable, HandlerTable, RequestHandler, Routed},
        workers::WorkerPool,
        write_queue::WriteQueue,
    },
    service::registry::{RegisterError, ServiceDescriptor},
    utils::hash8,
};

/// Scratch size of the read loop.
const READ_BUF_LEN: usize = 8 * 1024;

/// Run when a connection transitions to disconnected; fired exactly once.
pub type CloseHandler = Box<dyn FnOnce() + Send + 'static>;

/// Shared connected/disconnected flag handed out to interested parties.
#[derive(Debug)]
pub struct ConnectionStatus {
    connected: AtomicBool,
}

impl ConnectionStatus {
    fn new_connected() -> Arc<Self> {
        Arc::new(Self {
            connected: AtomicBool::new(true),
        })
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn set_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

/// Unbound connection prototype: the request-handler table plus the names
/// behind each method id (kept for collision diagnostics). Never touches a
/// socket; registration only exists here, so registering on a live
/// connection is unrepresentable.
#[derive(Clone, Default)]
pub struct ConnectionTemplate {
    handlers: HandlerTable,
    method_names: HashMap<u64, String>,
}

impl ConnectionTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every method of `service` under
    /// `hash8("{service}.{method}")`.
    ///
    /// A method id collision aborts before anything of `service` is
    /// inserted; previously registered services stay usable.
    pub fn register_service(
        &mut self,
        service: ServiceDescriptor,
    ) -> Result<(), RegisterError> {
        let (name, methods) = service.into_parts();

        let mut batch: Vec<(u64, String, RequestHandler)> = Vec::with_capacity(methods.len());
        for method in methods {
            let full_name = format!("{name}.{}", method.name());
            let id = hash8(&full_name);
            let colliding = self.method_names.get(&id).cloned().or_else(|| {
                batch
                    .iter()
                    .find(|(batch_id, _, _)| *batch_id == id)
                    .map(|(_, name, _)| name.clone())
            });
            if let Some(existing) = colliding {
                return Err(RegisterError::MethodIdCollision {
                    id,
                    method: full_name,
                    existing,
                });
            }
            batch.push((id, full_name, method.into_handler()));
        }

        for (id, full_name, handler) in batch {
            debug!(id, method = %full_name, "registered request handler");
            self.method_names.insert(id, full_name);
            self.handlers.insert(id, handler);
        }
        Ok(())
    }

    /// Number of registered methods.
    pub fn method_count(&self) -> usize {
        self.handlers.len()
    }

    /// Build a live connection bound to `loop_handle`. The socket is
    /// supplied afterwards via [`RpcConnection::attach`].
    pub fn instantiate(
        &self,
        id: u64,
        peer: String,
        loop_handle: Handle,
        workers: Arc<WorkerPool>,
        max_frame_length: usize,
    ) -> Arc<RpcConnection> {
        Arc::new(RpcConnection {
            id,
            peer,
            dispatch: DispatchTable::new(Arc::new(self.handlers.clone())),
            queue: WriteQueue::new(),
            status: ConnectionStatus::new_connected(),
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
            close_handler: Mutex::new(None),
            loop_handle,
            workers,
            max_frame_length,
        })
    }
}

/// One live, socket-bound connection.
pub struct RpcConnection {
    id: u64,
    peer: String,
    dispatch: DispatchTable,
    queue: WriteQueue,
    status: Arc<ConnectionStatus>,
    cancel: CancellationToken,
    closed: AtomicBool,
    close_handler: Mutex<Option<CloseHandler>>,
    loop_handle: Handle,
    workers: Arc<WorkerPool>,
    max_frame_length: usize,
}

impl RpcConnection {
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn status(&self) -> Arc<ConnectionStatus> {
        self.status.clone()
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.status.is_connected()
    }

    /// Install the close handler; replaces any previous one.
    pub fn set_close_handler(&self, handler: CloseHandler) {
        let mut slot = self
            .close_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = Some(handler);
    }

    pub(crate) fn dispatch_table(&self) -> &DispatchTable {
        &self.dispatch
    }

    /// Hand the connection its socket and start the read and write tasks
    /// on the assigned reactor loop.
    pub fn attach(self: &Arc<Self>, socket: std::net::TcpStream) {
        let conn = self.clone();
        self.loop_handle.spawn(async move {
            let stream = match TcpStream::from_std(socket) {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(conn = conn.id, "failed to register socket: {e}");
                    conn.close();
                    return;
                },
            };
            if let Err(e) = stream.set_nodelay(true) {
                debug!(conn = conn.id, "set_nodelay failed: {e}");
            }
            let (rd, wr) = stream.into_split();
            tokio::spawn(conn.clone().read_task(rd));
            tokio::spawn(conn.write_task(wr));
        });
    }

    /// Enqueue one envelope on the active write buffer. Thread-safe and
    /// non-blocking; returns before any byte reaches the socket. After
    /// close the envelope is dropped with a warning.
    pub fn send(&self, envelope: &Envelope) {
        if self.closed.load(Ordering::SeqCst) {
            warn!(conn = self.id, "send on closed connection dropped");
            return;
        }
        self.queue.push(encode_frame(envelope));
    }

    /// Wake the write task; it flips the double buffer and drains whatever
    /// has accumulated.
    pub fn schedule_write(&self) {
        self.queue.schedule();
    }

    /// Idempotent teardown: cancel both I/O tasks, discard the write
    /// queue, flip status to disconnected and fire the close handler.
    /// Exactly one caller wins; every later call is a no-op.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        self.queue.clear();
        self.status.set_disconnected();
        let handler = self
            .close_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handler) = handler {
            handler();
        }
        debug!(conn = self.id, peer = %self.peer, "connection closed");
    }

    async fn read_task(self: Arc<Self>, mut rd: OwnedReadHalf) {
        let mut decoder = FrameDecoder::new(self.max_frame_length);
        let mut scratch = [0u8; READ_BUF_LEN];
        loop {
            let n = tokio::select! {
                _ = self.cancel.cancelled() => return,
                res = rd.read(&mut scratch) => match res {
                    Ok(0) => {
                        debug!(conn = self.id, "peer closed the connection");
                        self.close();
                        return;
                    },
                    Ok(n) => n,
                    Err(e) => {
                        warn!(conn = self.id, "read error: {e}");
                        self.close();
                        return;
                    },
                },
            };

            for &byte in &scratch[..n] {
                match decoder.consume(byte) {
                    DecodeStep::More => {},
                    DecodeStep::Done => {
                        if let Some(envelope) = decoder.take_envelope() {
                            self.handle(envelope);
                        }
                    },
                    DecodeStep::Fail => {
                        warn!(conn = self.id, "framing error, closing");
                        self.close();
                        return;
                    },
                }
            }
        }
    }

    /// Runs on the reactor thread; must not block. Matched work is posted
    /// to the worker pool, a miss is dropped with a warning.
    fn handle(self: &Arc<Self>, envelope: Envelope) {
        match self.dispatch.route(envelope.identify) {
            Some(Routed::Request(handler)) => {
                let conn = self.clone();
                self.workers
                    .execute(Box::new(move || handler(envelope, &conn)));
            },
            Some(Routed::Response(callback)) => {
                let conn = self.clone();
                self.workers
                    .execute(Box::new(move || callback(envelope, &conn)));
            },
            None => {
                warn!(
                    conn = self.id,
                    identify = envelope.identify,
                    "envelope matches no handler and no pending call, dropping"
                );
            },
        }
    }

    async fn write_task(self: Arc<Self>, mut wr: OwnedWriteHalf) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = self.queue.readied() => {},
            }
            while let Some(chunks) = self.queue.flip() {
                for chunk in &chunks {
                    if let Err(e) = wr.write_all(chunk).await {
                        warn!(conn = self.id, "write error: {e}");
                        self.close();
                        return;
                    }
                }
            }
        }
    }
}

impl fmt::Debug for RpcConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcConnection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("connected", &self.is_connected())
            .finish()
    }
}
