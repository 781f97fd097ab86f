// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Double-buffered outbound queue.
//!
//! Two buffer lists and an `incoming` index: producers append encoded
//! chunks to `bufs[incoming]` under a short mutex and never wait on the
//! socket; the write task flips `incoming` only when the opposite buffer
//! is already drained, then writes the newly-previous buffer without
//! holding any lock. Producer order is preserved end to end.

use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Duplex {
    bufs: [Vec<Bytes>; 2],
    incoming: usize,
}

#[derive(Debug, Default)]
pub struct WriteQueue {
    duplex: Mutex<Duplex>,
    ready: Notify,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append encoded chunks to the active side. Non-blocking.
    pub fn push(&self, chunks: impl IntoIterator<Item = Bytes>) {
        let mut duplex = self.lock();
        let side = duplex.incoming;
        duplex.bufs[side].extend(chunks);
    }

    /// Wake the write task. A wake-up with nothing queued is harmless.
    pub fn schedule(&self) {
        self.ready.notify_one();
    }

    /// Park until [`schedule`](Self::schedule) is called.
    pub async fn readied(&self) {
        self.ready.notified().await;
    }

    /// Writer-side flip. If the active buffer holds data, swap `incoming`
    /// to the (empty) opposite side and hand the previously-active buffer
    /// to the caller for draining. `None` means idle.
    ///
    /// Only the write task calls this, which is what keeps the opposite
    /// buffer empty at every flip.
    pub fn flip(&self) -> Option<Vec<Bytes>> {
        let mut duplex = self.lock();
        let active = duplex.incoming;
        if duplex.bufs[active].is_empty() {
            return None;
        }
        duplex.incoming ^= 1;
        debug_assert!(duplex.bufs[duplex.incoming].is_empty());
        Some(std::mem::take(&mut duplex.bufs[active]))
    }

    /// Discard everything queued on both sides.
    pub fn clear(&self) {
        let mut duplex = self.lock();
        duplex.bufs[0].clear();
        duplex.bufs[1].clear();
    }

    fn lock(&self) -> MutexGuard<'_, Duplex> {
        self.duplex.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
