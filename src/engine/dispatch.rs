// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Per-connection dispatch table.
//!
//! Two maps keyed by the envelope `identify` field: request handlers,
//! registered before the connection ever sees a byte and read-only from
//! then on, and pending-response callbacks, parked per in-flight call and
//! consumed on the matching RESPONSE. Requests are probed first — that
//! lookup is lock-free — and the transient response side second, under
//! the table mutex.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::{codec::envelope::Envelope, engine::connection::RpcConnection};

/// Capability bound to one method id; runs on the worker tier.
pub type RequestHandler =
    Arc<dyn Fn(Envelope, &Arc<RpcConnection>) + Send + Sync + 'static>;

/// One-shot completion parked for one in-flight call.
pub type ResponseHandler =
    Box<dyn FnOnce(Envelope, &Arc<RpcConnection>) + Send + 'static>;

pub type HandlerTable = HashMap<u64, RequestHandler>;

/// Where one inbound envelope goes.
pub enum Routed {
    Request(RequestHandler),
    Response(ResponseHandler),
}

pub struct DispatchTable {
    request_handlers: Arc<HandlerTable>,
    pending_responses: Mutex<HashMap<u64, ResponseHandler>>,
}

impl DispatchTable {
    pub fn new(request_handlers: Arc<HandlerTable>) -> Self {
        Self {
            request_handlers,
            pending_responses: Mutex::new(HashMap::new()),
        }
    }

    /// Route one `identify`: request handler first, then (and only then)
    /// a parked response callback, which is removed on the way out.
    /// `None` is a dispatch miss; the caller drops the envelope.
    pub fn route(&self, identify: u64) -> Option<Routed> {
        if let Some(handler) = self.request_handlers.get(&identify) {
            return Some(Routed::Request(handler.clone()));
        }
        self.lock_pending().remove(&identify).map(Routed::Response)
    }

    /// Park a response callback under a free id, starting at `seed` and
    /// linearly probing upward (wrapping). The mutex spans the whole
    /// probe-and-insert, so concurrent callers always end up with
    /// pairwise-distinct ids.
    pub fn park_response(&self, seed: u64, handler: ResponseHandler) -> u64 {
        let mut pending = self.lock_pending();
        let mut id = seed;
        while pending.contains_key(&id) {
            id = id.wrapping_add(1);
        }
        pending.insert(id, handler);
        id
    }

    pub fn pending_len(&self) -> usize {
        self.lock_pending().len()
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<u64, ResponseHandler>> {
        self.pending_responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
