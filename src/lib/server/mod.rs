pub mod routes;

use std::net::SocketAddr;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::ports::datastore::TreeDatastore;

use self::routes::{
    amount_and_proof_handler, amounts_and_proofs_handler, publish_accounts_handler,
    roots_handler, tree_accounts_handler, AppState,
};

/// Build the axum router over a shared state.
pub fn router<D: TreeDatastore + 'static>(state: AppState<D>) -> Router {
    Router::new()
        .route("/roots", get(roots_handler::<D>))
        .route("/roots/{root}", get(tree_accounts_handler::<D>))
        .route("/amountAndProof/{address}", get(amount_and_proof_handler::<D>))
        .route("/amountsAndProofs", post(amounts_and_proofs_handler::<D>))
        .route("/accounts", post(publish_accounts_handler::<D>))
        .with_state(state)
}

/// A running HTTP server. Dropping the handle leaves the server running
/// until the runtime stops; call [`ServerHandle::shutdown`] to stop it.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<std::io::Result<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections, let in-flight requests finish, and wait
    /// for the server task to exit.
    pub async fn shutdown(mut self) -> Result<(), ServerError> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.task
            .await
            .map_err(|e| ServerError::Task(e.to_string()))?
            .map_err(ServerError::Io)
    }
}

/// Bind `addr` and serve the routes in a background task. Port 0 picks a
/// free port; the bound address is on the returned handle.
pub async fn start_server<D: TreeDatastore + 'static>(
    state: AppState<D>,
    addr: SocketAddr,
) -> Result<ServerHandle, ServerError> {
    let listener = TcpListener::bind(addr).await.map_err(ServerError::Bind)?;
    let bound_addr = listener.local_addr().map_err(ServerError::Bind)?;

    let (tx, rx) = oneshot::channel::<()>();
    let app = router(state);

    let task = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                rx.await.ok();
            })
            .await;
        if let Err(e) = &result {
            error!("server stopped with error: {e}");
        }
        result
    });

    info!(%bound_addr, "HTTP server listening");
    Ok(ServerHandle {
        addr: bound_addr,
        shutdown: Some(tx),
        task,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("cannot bind listener: {0}")]
    Bind(std::io::Error),

    #[error("server error: {0}")]
    Io(std::io::Error),

    #[error("server task failed: {0}")]
    Task(String),
}
