// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! A fixed pool of single-threaded event loops.
//!
//! All socket I/O, decoder stepping and dispatch-table lookups run on
//! these loops; user handler code never does. New sockets are bound to a
//! loop with [`ReactorPool::next_loop`] in round-robin order.

use std::{
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
};

use anyhow::{Context, Result, ensure};
use tokio::runtime::{Builder, Handle};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct ReactorPool {
    handles: Vec<Handle>,
    next: AtomicUsize,
    cancel: CancellationToken,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl ReactorPool {
    /// Spawn `io_service_number` loops, each a current-thread runtime
    /// parked on its own OS thread until [`stop`](Self::stop).
    pub fn start(io_service_number: usize) -> Result<Self> {
        ensure!(io_service_number >= 1, "io_service_number must be >= 1");

        let cancel = CancellationToken::new();
        let mut handles = Vec::with_capacity(io_service_number);
        let mut threads = Vec::with_capacity(io_service_number);

        for i in 0..io_service_number {
            let (tx, rx) = std::sync::mpsc::channel();
            let stop = cancel.clone();
            let thread = thread::Builder::new()
                .name(format!("reactor-{i}"))
                .spawn(move || {
                    let rt = match Builder::new_current_thread().enable_all().build()
                    {
                        Ok(rt) => rt,
                        Err(e) => {
                            let _ = tx.send(Err(e));
                            return;
                        },
                    };
                    if tx.send(Ok(rt.handle().clone())).is_err() {
                        return;
                    }
                    rt.block_on(stop.cancelled());
                    debug!("reactor loop stopped");
                })
                .context("failed to spawn reactor thread")?;

            let handle = rx
                .recv()
                .context("reactor thread died during startup")?
                .context("failed to build reactor runtime")?;
            handles.push(handle);
            threads.push(thread);
        }

        Ok(Self {
            handles,
            next: AtomicUsize::new(0),
            cancel,
            threads: Mutex::new(threads),
        })
    }

    /// Next loop in round-robin order, for binding a new socket.
    pub fn next_loop(&self) -> Handle {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.handles.len();
        self.handles[i].clone()
    }

    /// Stop every loop and join its thread. Tasks still pending on a loop
    /// are dropped, not run to completion.
    pub fn stop(&self) {
        self.cancel.cancel();
        let mut threads = self
            .threads
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        for thread in threads.drain(..) {
            let _ = thread.join();
        }
    }
}

impl Drop for ReactorPool {
    fn drop(&mut self) {
        // Let the loop threads wind down on their own; joining here could
        // block an async context.
        self.cancel.cancel();
    }
}
