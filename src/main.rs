// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Context, Result};
use line_rpc::{
    cfg::{
        cli::{config_path_from_args, resolve_config_path},
        config::ServerConfig,
        logger::init_logger,
    },
    engine::connection::ConnectionTemplate,
    server::Server,
    service::registry::{MethodDescriptor, ServiceDescriptor},
};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Serialize, Deserialize)]
struct EchoRequest {
    message: String,
}

#[derive(Serialize, Deserialize)]
struct EchoResponse {
    message: String,
}

fn echo_service() -> ServiceDescriptor {
    ServiceDescriptor::new("demo.Echo").method(MethodDescriptor::unary(
        "Ping",
        |req: EchoRequest| EchoResponse {
            message: req.message,
        },
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = init_logger("tests/config_logger.yaml")?;

    let cfg = resolve_config_path(&config_path_from_args("tests/config_server.yaml"))
        .and_then(ServerConfig::load_from_file)
        .context("failed to resolve or load config")?;

    let server = Server::from_config(&cfg)?;

    let mut template = ConnectionTemplate::new();
    template.register_service(echo_service())?;

    for listen in &cfg.listen {
        let addr = server
            .listen(&listen.host, listen.port, template.clone())
            .await?;
        info!(%addr, "serving demo.Echo");
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for ctrl-c")?;
    info!("shutting down");
    server.stop();

    Ok(())
}
