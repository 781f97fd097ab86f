// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The server: acceptors plus connection-lifecycle management.
//!
//! One [`Server`] owns the reactor pool, the worker pool, a table of live
//! connections and a table of acceptors keyed by `host:port`. Each accept
//! clones the listening template into a fresh connection, binds it to the
//! next reactor loop and installs a close handler that removes it from
//! the live set again.

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use anyhow::{Context, Result, anyhow, ensure};
use dashmap::DashMap;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    cfg::config::{DEFAULT_MAX_FRAME_LENGTH, ServerConfig},
    engine::{
        connection::{ConnectionTemplate, RpcConnection},
        reactor::ReactorPool,
        workers::WorkerPool,
    },
};

struct AcceptorRecord {
    cancel: CancellationToken,
}

pub struct Server {
    reactors: Arc<ReactorPool>,
    workers: Arc<WorkerPool>,
    connections: Arc<DashMap<u64, Arc<RpcConnection>>>,
    acceptors: DashMap<String, AcceptorRecord>,
    next_conn_id: Arc<AtomicU64>,
    max_frame_length: usize,
    running: AtomicBool,
}

impl Server {
    pub fn new(io_service_number: usize, worker_threads: usize) -> Result<Self> {
        Self::with_max_frame_length(
            io_service_number,
            worker_threads,
            DEFAULT_MAX_FRAME_LENGTH,
        )
    }

    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        Self::with_max_frame_length(
            config.runtime.io_service_number,
            config.runtime.worker_threads,
            config.runtime.max_frame_length,
        )
    }

    fn with_max_frame_length(
        io_service_number: usize,
        worker_threads: usize,
        max_frame_length: usize,
    ) -> Result<Self> {
        Ok(Self {
            reactors: Arc::new(ReactorPool::start(io_service_number)?),
            workers: Arc::new(WorkerPool::new(worker_threads)?),
            connections: Arc::new(DashMap::new()),
            acceptors: DashMap::new(),
            next_conn_id: Arc::new(AtomicU64::new(1)),
            max_frame_length,
            running: AtomicBool::new(true),
        })
    }

    /// Bind `host:port` and serve clones of `template` on every accepted
    /// socket. Returns the bound local address (useful with port 0).
    pub async fn listen(
        &self,
        host: &str,
        port: u16,
        template: ConnectionTemplate,
    ) -> Result<SocketAddr> {
        ensure!(self.running.load(Ordering::SeqCst), "server is stopped");

        let key = format!("{host}:{port}");
        ensure!(
            !self.acceptors.contains_key(&key),
            "already listening on {key}"
        );

        let cancel = CancellationToken::new();
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.reactors.next_loop().spawn(accept_task(
            key.clone(),
            template,
            tx,
            cancel.clone(),
            self.reactors.clone(),
            self.workers.clone(),
            self.connections.clone(),
            self.next_conn_id.clone(),
            self.max_frame_length,
        ));

        let local = rx
            .await
            .context("acceptor loop dropped before binding")??;
        self.acceptors.insert(key.clone(), AcceptorRecord { cancel });
        info!(%local, acceptor = %key, "listening");
        Ok(local)
    }

    /// Number of live server-side connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Close every acceptor, then every live connection. Close handlers
    /// drain the connection table; the pools are shut down last.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("stopping server");
        }
        for record in self.acceptors.iter() {
            record.value().cancel.cancel();
        }
        self.acceptors.clear();

        let live: Vec<_> = self
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for conn in live {
            conn.close();
        }

        self.workers.stop();
        self.reactors.stop();
    }
}

#[allow(clippy::too_many_arguments)]
async fn accept_task(
    key: String,
    template: ConnectionTemplate,
    started: tokio::sync::oneshot::Sender<Result<SocketAddr>>,
    cancel: CancellationToken,
    reactors: Arc<ReactorPool>,
    workers: Arc<WorkerPool>,
    connections: Arc<DashMap<u64, Arc<RpcConnection>>>,
    next_conn_id: Arc<AtomicU64>,
    max_frame_length: usize,
) {
    let listener = match TcpListener::bind(key.as_str()).await {
        Ok(listener) => listener,
        Err(e) => {
            let _ = started.send(Err(anyhow!("failed to bind {key}: {e}")));
            return;
        },
    };
    let local = match listener.local_addr() {
        Ok(local) => local,
        Err(e) => {
            let _ = started.send(Err(anyhow!("no local address for {key}: {e}")));
            return;
        },
    };
    if started.send(Ok(local)).is_err() {
        return;
    }

    loop {
        let (stream, peer) = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(acceptor = %key, "acceptor stopped");
                return;
            },
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(acceptor = %key, "accept error: {e}");
                    continue;
                },
            },
        };

        let socket = match stream.into_std() {
            Ok(socket) => socket,
            Err(e) => {
                warn!(%peer, "failed to detach accepted socket: {e}");
                continue;
            },
        };

        let id = next_conn_id.fetch_add(1, Ordering::SeqCst);
        debug!(conn = id, %peer, "accepted connection");
        let conn = template.instantiate(
            id,
            peer.to_string(),
            reactors.next_loop(),
            workers.clone(),
            max_frame_length,
        );
        let table = connections.clone();
        conn.set_close_handler(Box::new(move || {
            table.remove(&id);
        }));
        connections.insert(id, conn.clone());
        conn.attach(socket);
    }
}
