// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The client connector.
//!
//! Resolves `server:port` to candidate endpoints, tries each in order and
//! promotes the first socket that accepts into a live connection cloned
//! from the client's template. The reactor pool starts lazily on the
//! first connect; the close handler clears the current-connection slot so
//! a later `connect` starts clean.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicU64, Ordering},
};

use anyhow::{Context, Result, bail};
use once_cell::sync::OnceCell;
use tokio::net::{TcpStream, lookup_host};
use tracing::{debug, warn};

use crate::{
    cfg::config::ClientConfig,
    engine::{
        connection::{ConnectionTemplate, RpcConnection},
        reactor::ReactorPool,
        workers::WorkerPool,
    },
};

pub struct RpcClient {
    config: ClientConfig,
    template: ConnectionTemplate,
    reactors: OnceCell<Arc<ReactorPool>>,
    workers: Arc<WorkerPool>,
    current: Arc<Mutex<Option<Arc<RpcConnection>>>>,
    next_conn_id: AtomicU64,
}

impl RpcClient {
    pub fn new(config: ClientConfig, template: ConnectionTemplate) -> Result<Self> {
        config.validate()?;
        let workers = Arc::new(WorkerPool::new(config.runtime.worker_threads)?);
        Ok(Self {
            config,
            template,
            reactors: OnceCell::new(),
            workers,
            current: Arc::new(Mutex::new(None)),
            next_conn_id: AtomicU64::new(1),
        })
    }

    /// Connect (or return the live connection if there is one).
    ///
    /// Every resolved endpoint is tried in order; the first TCP connect
    /// that succeeds wins. When all candidates are exhausted the error of
    /// the last attempt is returned and the pools stay usable for a retry.
    pub async fn connect(&self) -> Result<Arc<RpcConnection>> {
        if let Some(conn) = self.connection() {
            if conn.is_connected() {
                warn!("connect called but the connection is already live");
                return Ok(conn);
            }
        }
        self.disconnect();

        let reactors = self.reactor_pool()?;
        let loop_handle = reactors.next_loop();

        let (tx, rx) = tokio::sync::oneshot::channel();
        let server = self.config.server.clone();
        let port = self.config.port;
        loop_handle.spawn(async move {
            let _ = tx.send(open_stream(&server, port).await);
        });
        let socket = rx
            .await
            .context("reactor loop dropped the connect task")??;

        let peer = socket
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| format!("{}:{}", self.config.server, self.config.port));
        let id = self.next_conn_id.fetch_add(1, Ordering::SeqCst);
        let conn = self.template.instantiate(
            id,
            peer,
            loop_handle,
            self.workers.clone(),
            self.config.runtime.max_frame_length,
        );

        let slot = self.current.clone();
        conn.set_close_handler(Box::new(move || {
            slot.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
        }));
        *self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(conn.clone());

        conn.attach(socket);
        debug!(conn = conn.id(), peer = conn.peer(), "client connected");
        Ok(conn)
    }

    /// The live connection, if any.
    pub fn connection(&self) -> Option<Arc<RpcConnection>> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Best-effort close of the current connection; idempotent.
    pub fn disconnect(&self) {
        let conn = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(conn) = conn {
            conn.close();
        }
    }

    /// Disconnect and shut both pools down.
    pub fn shutdown(&self) {
        self.disconnect();
        self.workers.stop();
        if let Some(reactors) = self.reactors.get() {
            reactors.stop();
        }
    }

    fn reactor_pool(&self) -> Result<&Arc<ReactorPool>> {
        self.reactors.get_or_try_init(|| {
            ReactorPool::start(self.config.runtime.io_service_number).map(Arc::new)
        })
    }
}

async fn open_stream(server: &str, port: u16) -> Result<std::net::TcpStream> {
    let candidates = lookup_host((server, port))
        .await
        .with_context(|| format!("failed to resolve {server}:{port}"))?;

    let mut last_error = None;
    for addr in candidates {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                return stream
                    .into_std()
                    .context("failed to detach connected socket");
            },
            Err(e) => {
                debug!(%addr, "endpoint refused: {e}");
                last_error = Some(e);
            },
        }
    }
    match last_error {
        Some(e) => Err(e).context(format!("no endpoint of {server}:{port} accepted")),
        None => bail!("{server}:{port} resolved to no endpoints"),
    }
}
