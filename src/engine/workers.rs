// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The worker tier: a bounded set of threads running user code.
//!
//! Request handlers and response completions are posted here from the
//! reactor loops, so a blocking user call (database, disk, ...) can never
//! stall socket I/O. FIFO within a worker thread; no ordering guarantee
//! across workers.

use std::sync::Mutex;

use anyhow::{Context, Result, ensure};
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::warn;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    handle: Handle,
    runtime: Mutex<Option<Runtime>>,
}

impl WorkerPool {
    pub fn new(worker_threads: usize) -> Result<Self> {
        ensure!(worker_threads >= 1, "worker_threads must be >= 1");

        let runtime = Builder::new_multi_thread()
            .worker_threads(worker_threads)
            .thread_name("rpc-worker")
            .build()
            .context("failed to build worker runtime")?;

        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Mutex::new(Some(runtime)),
        })
    }

    /// Submit one job. Jobs posted after [`stop`](Self::stop) are dropped.
    pub fn execute(&self, job: Job) {
        drop(self.handle.spawn(async move { job() }));
    }

    /// Shut the pool down without waiting for queued jobs. Safe to call
    /// from async context (the runtime is dropped in the background).
    pub fn stop(&self) {
        let runtime = self
            .runtime
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(rt) = runtime {
            rt.shutdown_background();
        } else {
            warn!("worker pool already stopped");
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let runtime = self
            .runtime
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(rt) = runtime {
            rt.shutdown_background();
        }
    }
}
