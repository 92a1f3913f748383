//! TCP accept loop

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::lobby::GameManager;

use super::handler::handle_client;

/// Accept clients until the listener dies or the task is cancelled.
/// Client ids are handed out in connection order; finished lobbies are
/// reaped opportunistically between accepts.
pub async fn run(listener: TcpListener, manager: Arc<GameManager>) {
    let mut next_id: u32 = 1;
    loop {
        manager.reap_finished();
        match listener.accept().await {
            Ok((socket, addr)) => {
                let client_id = next_id;
                next_id += 1;
                info!(client_id, %addr, "Accepted connection");
                tokio::spawn(handle_client(socket, client_id, manager.clone()));
            }
            Err(e) => {
                warn!(error = %e, "accept() failed");
            }
        }
    }
}
