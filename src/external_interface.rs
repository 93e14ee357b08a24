//! External Interface Module
//!
//! Unix-socket transport for the engine. Each connection is served on its own
//! thread and may carry any number of frames (see [`crate::protocol`]); every
//! request frame is answered with exactly one response frame. A frame that
//! cannot be decoded closes the connection, since no transaction id is
//! available to address an error response to.

use anyhow::{Context, Result};
use std::fs;
use std::io::{BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::thread;
use tracing::{debug, error, info, warn};

use crate::configs::AppConfig;
use crate::context::ExchangeContext;
use crate::handlers::CmpEngine;
use crate::protocol::{deserialize_message, read_frame, serialize_message};

/// Start the Unix socket server and listen for incoming requests
///
/// Removes a stale socket file at the configured path before binding.
/// Blocks for as long as the listener accepts connections.
pub fn start_socket_server(engine: CmpEngine, config: &AppConfig) -> Result<()> {
    let socket_path = &config.server.socket_path;
    if socket_path.exists() {
        fs::remove_file(socket_path).context(format!(
            "Failed to remove existing socket at {}",
            socket_path.display()
        ))?;
    }

    let listener = UnixListener::bind(socket_path).context(format!(
        "Failed to bind Unix socket at {}",
        socket_path.display()
    ))?;
    info!(socket = %socket_path.display(), "Unix socket server started");

    serve(
        listener,
        engine,
        config.exchange_context(),
        config.server.max_frame_size,
    );
    Ok(())
}

/// Accept connections on `listener`, one thread per client.
pub fn serve(listener: UnixListener, engine: CmpEngine, base: ExchangeContext, max_frame_size: u32) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let engine = engine.clone();
                let base = base.clone();
                let spawned = thread::Builder::new()
                    .name("cmp-client".to_string())
                    .spawn(move || {
                        if let Err(e) = handle_client(stream, &engine, &base, max_frame_size) {
                            warn!(error = %format!("{:#}", e), "Error handling client connection");
                        }
                    });
                if let Err(e) = spawned {
                    error!(error = %e, "Failed to spawn client thread");
                }
            }
            Err(e) => {
                error!(error = %e, "Error accepting connection");
            }
        }
    }
}

/// Handle an individual client connection
fn handle_client(
    mut stream: UnixStream,
    engine: &CmpEngine,
    base: &ExchangeContext,
    max_frame_size: u32,
) -> Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    while let Some(frame) = read_frame(&mut reader, max_frame_size)? {
        let request = deserialize_message(&frame)?;
        debug!(
            transaction_id = %request.transaction_label(),
            bytes = frame.len(),
            "Received request frame"
        );

        let ctx = base.for_new_exchange();
        let response = engine.process(&request, &ctx);

        let (_, bytes) = serialize_message(&response)?;
        stream
            .write_all(&bytes)
            .context("Failed to write response frame")?;
        stream.flush()?;
    }
    debug!("Client closed connection");
    Ok(())
}
