use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    result::Result as StdResult,
};

use anyhow::Context;
use log::info;

use airbear_server::{ProcessorConfig, ServerState, build_router};

type Result<T = (), E = anyhow::Error> = StdResult<T, E>;

#[tokio::main]
async fn main() -> Result {
    colog::init();

    let args = std::env::args().collect::<Vec<_>>();
    let socket_addr = args
        .get(1)
        .map(|raw_binding| raw_binding.parse::<SocketAddr>())
        .transpose()
        .context("Invalid socket addr passed")?
        .unwrap_or(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 4114));

    let state = ServerState::new(ProcessorConfig::from_env());
    state.seed_demo();

    let app = build_router(state);

    info!("Starting airbear server {}", env!("CARGO_PKG_VERSION"));

    let listener = tokio::net::TcpListener::bind(socket_addr)
        .await
        .context("Failed to bind server socket")?;

    info!("Listening on http://{socket_addr}");

    axum::serve(listener, app)
        .await
        .context("Error while running server")
}
