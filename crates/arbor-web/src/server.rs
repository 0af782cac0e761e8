use axum::serve;
use tokio::net::TcpListener;
use tracing::info;

use crate::error::WebError;
use crate::routes::router;
use crate::state::WebState;

pub async fn run_web_server(bind_addr: &str, state: WebState) -> Result<(), WebError> {
    let listener = TcpListener::bind(bind_addr).await?;
    info!(bind = %listener.local_addr()?, "arbor-web listening");
    serve(listener, router(state)).await?;
    Ok(())
}
