//! Port server loop
//!
//! Reads inbound messages for one port and handles each in its own task, so
//! a request waiting on user confirmation never holds up the others. When the
//! inbound side closes, the port is disconnected and its subscriptions are
//! torn down.

use crate::dispatcher::Background;
use crate::port::Port;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use warden_core::{ErrorCategory, PortMessage, RequestMessage};

/// Serve `port` until `inbound` closes or the port disconnects
pub async fn serve_port(background: Arc<Background>, port: Port, mut inbound: mpsc::Receiver<RequestMessage>) {
    info!(event = "port_connected", port_id = %port.id(), "Port connected");

    loop {
        tokio::select! {
            message = inbound.recv() => match message {
                Some(message) => {
                    let background = background.clone();
                    let port = port.clone();
                    tokio::spawn(async move {
                        handle_message(&background, &port, message).await;
                    });
                }
                None => break,
            },
            _ = port.disconnected() => break,
        }
    }

    port.disconnect();
    info!(event = "port_closed", port_id = %port.id(), "Port closed");
}

/// Handle one message and post the response or error back to `port`
pub async fn handle_message(background: &Background, port: &Port, message: RequestMessage) {
    let RequestMessage {
        id,
        message,
        request,
    } = message;

    let reply = match background.handle(&id, &message, request, port).await {
        Ok(response) => PortMessage::Response {
            id: id.clone(),
            response,
        },
        Err(e) => {
            match e.category() {
                ErrorCategory::Unhandled | ErrorCategory::Internal | ErrorCategory::Storage => {
                    error!(request_id = %id, message = %message, category = ?e.category(), "Request failed: {}", e)
                }
                _ if e.is_user_error() => {
                    debug!(request_id = %id, message = %message, category = ?e.category(), "Request refused: {}", e)
                }
                _ => warn!(request_id = %id, message = %message, category = ?e.category(), "Request failed: {}", e),
            }
            PortMessage::error(id.clone(), &e)
        }
    };

    if port.post(reply).await.is_err() {
        debug!(request_id = %id, port_id = %port.id(), "Port gone before reply");
    }
}
