use std::sync::Arc;

use tokio::task::JoinHandle;

use airbear_server::{ProcessorConfig, ServerState, build_router};
use airbear_transport::RestBackend;

use crate::prelude::*;

pub const TEST_WEBHOOK_SECRET: &str = "test-webhook-secret";

/// A real airbear server on an ephemeral port, living for one test. Driving
/// it through [RestBackend] exercises the same wire path the app uses.
pub struct TestRig {
    pub base_url: String,
    pub state: ServerState,
    server: JoinHandle<()>,
}

impl TestRig {
    pub async fn start() -> Result<Self> {
        let state = ServerState::new(ProcessorConfig {
            base_url: None,
            webhook_secret: TEST_WEBHOOK_SECRET.to_string(),
        });
        state.seed_demo();

        let router = build_router(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .context("Failed to bind test listener")?;
        let addr = listener.local_addr().context("Listener has no address")?;

        let server = tokio::spawn(async move {
            if let Err(why) = axum::serve(listener, router).await {
                eprintln!("Test server stopped: {why}");
            }
        });

        Ok(Self {
            base_url: format!("http://{addr}"),
            state,
            server,
        })
    }

    /// A fresh unauthenticated client pointed at this rig
    pub fn backend(&self) -> Result<Arc<RestBackend>> {
        Ok(Arc::new(RestBackend::with_base_url(self.base_url.clone())?))
    }
}

impl Drop for TestRig {
    fn drop(&mut self) {
        self.server.abort();
    }
}
