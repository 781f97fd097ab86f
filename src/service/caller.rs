// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The caller stub: issuing requests over a live connection.
//!
//! Every in-flight call owns a unique response id: the seed is the hash
//! of the response type name and the dispatch table linearly probes from
//! there under its mutex. The parked callback fires on the worker tier
//! when the matching RESPONSE arrives. On disconnect parked callbacks are
//! never fired; they go away with the connection.

use std::{any::type_name, sync::Arc};

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;

use crate::{
    codec::envelope::Envelope,
    engine::{connection::RpcConnection, dispatch::ResponseHandler},
    utils::hash8,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CallError {
    #[error("failed to serialize request: {0}")]
    RequestSerialize(String),
    #[error("failed to parse the response: {0}")]
    ResponseParse(String),
    #[error("connection dropped before the response arrived")]
    ConnectionDropped,
}

impl RpcConnection {
    /// Issue one REQUEST envelope and park `on_response` under a freshly
    /// allocated response id, which is returned.
    ///
    /// `method_full_name` must hash identically on both peers;
    /// `response_full_name` only seeds the local response-id probe.
    pub fn call_raw(
        self: &Arc<Self>,
        method_full_name: &str,
        response_full_name: &str,
        payload: Bytes,
        on_response: ResponseHandler,
    ) -> u64 {
        let request_id = hash8(method_full_name);
        let seed = hash8(response_full_name);
        let response_id = self.dispatch_table().park_response(seed, on_response);
        debug!(
            conn = self.id(),
            method = method_full_name,
            request_id,
            response_id,
            "issuing call"
        );

        let envelope = Envelope::request(request_id, response_id, payload);
        self.send(&envelope);
        self.schedule_write();
        response_id
    }

    /// Typed call: serialize `request`, await the peer's response, parse
    /// it as `Resp`.
    ///
    /// There is no timeout in the engine; a caller that must not wait
    /// forever wraps this future in `tokio::time::timeout`. If the peer
    /// disconnects first the future stays pending for as long as the
    /// connection object lives and resolves to
    /// [`CallError::ConnectionDropped`] once it is dropped.
    pub async fn call<Req, Resp>(
        self: &Arc<Self>,
        method_full_name: &str,
        request: &Req,
    ) -> Result<Resp, CallError>
    where
        Req: Serialize,
        Resp: DeserializeOwned + Send + 'static,
    {
        let payload = serde_json::to_vec(request)
            .map_err(|e| CallError::RequestSerialize(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.call_raw(
            method_full_name,
            type_name::<Resp>(),
            Bytes::from(payload),
            Box::new(move |envelope, _conn| {
                let parsed = serde_json::from_slice::<Resp>(&envelope.content)
                    .map_err(|e| CallError::ResponseParse(e.to_string()));
                let _ = tx.send(parsed);
            }),
        );

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(CallError::ConnectionDropped),
        }
    }
}
