// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Service descriptors: what gets bound into a connection template.
//!
//! A service is a named bag of methods; each method wraps a user function
//! into a [`RequestHandler`] capability that parses the envelope content
//! as the method's request type and answers through a [`Responder`]. The
//! wrapped handler runs on the worker tier, so it may block.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use tracing::warn;

use crate::{
    codec::envelope::Envelope,
    engine::{connection::RpcConnection, dispatch::RequestHandler},
};

#[derive(Debug, Error)]
pub enum RegisterError {
    #[error(
        "method name {method} collides with {existing} after hash \
         ({id:#018x}), please change"
    )]
    MethodIdCollision {
        id: u64,
        method: String,
        existing: String,
    },
}

/// Completes one inbound request: builds the RESPONSE envelope with the
/// request's `response_identify` as its `identify`, serializes the user
/// response and schedules the write. Dropping a responder sends nothing —
/// the caller's slot stays parked until the connection goes away. A
/// response that fails to serialize is dropped the same way, since the
/// wire format has no well-formed encoding for it.
pub struct Responder {
    conn: Arc<RpcConnection>,
    response_identify: u64,
    method: Arc<str>,
}

impl Responder {
    pub fn send<Resp: Serialize>(self, response: &Resp) {
        let content = match serde_json::to_vec(response) {
            Ok(bytes) => bytes,
            Err(e) => {
                // An envelope without content is malformed on the wire and
                // would kill the peer's whole connection. Drop the reply
                // instead; the caller sees the same outcome as a dropped
                // responder.
                warn!(
                    method = %self.method,
                    "failed to serialize response, dropping reply: {e}"
                );
                return;
            },
        };
        let envelope = Envelope::response(self.response_identify, Bytes::from(content));
        self.conn.send(&envelope);
        self.conn.schedule_write();
    }

    /// The connection the request arrived on, for handlers that need it.
    pub fn connection(&self) -> &Arc<RpcConnection> {
        &self.conn
    }
}

/// One method: its short name plus the wrapped handler capability.
pub struct MethodDescriptor {
    name: String,
    handler: RequestHandler,
}

impl MethodDescriptor {
    /// The common case: a synchronous `request -> response` function. The
    /// response is sent as soon as the function returns.
    pub fn unary<Req, Resp, F>(name: impl Into<String>, method: F) -> Self
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(Req) -> Resp + Send + Sync + 'static,
    {
        Self::deferred(name, move |request, responder: Responder| {
            let response = method(request);
            responder.send(&response);
        })
    }

    /// Completion-style: the handler owns the [`Responder`] and may answer
    /// later (or never, e.g. when handing it to another thread).
    pub fn deferred<Req, F>(name: impl Into<String>, method: F) -> Self
    where
        Req: DeserializeOwned + Send + 'static,
        F: Fn(Req, Responder) + Send + Sync + 'static,
    {
        let name = name.into();
        let label: Arc<str> = Arc::from(name.as_str());
        let handler: RequestHandler =
            Arc::new(move |envelope: Envelope, conn: &Arc<RpcConnection>| {
                let request: Req = match serde_json::from_slice(&envelope.content) {
                    Ok(request) => request,
                    Err(e) => {
                        warn!(method = %label, "invalid request payload: {e}");
                        return;
                    },
                };
                let responder = Responder {
                    conn: conn.clone(),
                    response_identify: envelope.response_identify.unwrap_or_default(),
                    method: label.clone(),
                };
                method(request, responder);
            });
        Self { name, handler }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn into_handler(self) -> RequestHandler {
        self.handler
    }
}

/// A named service assembled builder-style, then handed to
/// [`ConnectionTemplate::register_service`].
///
/// [`ConnectionTemplate::register_service`]:
/// crate::engine::connection::ConnectionTemplate::register_service
pub struct ServiceDescriptor {
    name: String,
    methods: Vec<MethodDescriptor>,
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    pub fn method(mut self, method: MethodDescriptor) -> Self {
        self.methods.push(method);
        self
    }

    /// `"{service}.{method}"`, the string both peers hash for routing.
    pub fn full_method_name(service: &str, method: &str) -> String {
        format!("{service}.{method}")
    }

    pub(crate) fn into_parts(self) -> (String, Vec<MethodDescriptor>) {
        (self.name, self.methods)
    }
}
