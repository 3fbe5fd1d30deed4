/*!
TCP front end for the simulated controller.

Each accepted connection is served on its own thread; all connections share
one controller state.
*/

use anyhow::{Context, Result};
use snpx::transport::read_frame;
use snpx::SimulatedController;
use std::io::{ErrorKind, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Accept connections until `running` is cleared
pub fn run_server(controller: SimulatedController, listener: TcpListener, running: Arc<AtomicBool>) -> Result<()> {
    let local = listener.local_addr()?;
    listener
        .set_nonblocking(true)
        .context("Failed to make listener non-blocking")?;
    info!("🤖 Simulated controller listening on {}", local);

    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                let controller = controller.clone();
                thread::spawn(move || {
                    if let Err(e) = serve_connection(controller, stream, peer) {
                        error!("Connection {} failed: {}", peer, e);
                    }
                });
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(e) => return Err(e).context("Failed to accept connection"),
        }
    }

    info!("🛑 Simulated controller stopped");
    Ok(())
}

fn serve_connection(controller: SimulatedController, mut stream: TcpStream, peer: SocketAddr) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    info!("🔌 Client connected: {}", peer);

    loop {
        let frame = match read_frame(&mut stream) {
            Ok(frame) => frame,
            Err(e) if matches!(e.kind(), ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset) => break,
            Err(e) => return Err(e.into()),
        };
        trace!("{} → {}", peer, hex::encode(&frame));

        match controller.handle_frame(&frame) {
            Some(reply) => {
                trace!("{} ← {}", peer, hex::encode(&reply));
                stream.write_all(&reply)?;
            }
            None => debug!("{}: request dropped", peer),
        }
    }

    if let Err(e) = stream.shutdown(std::net::Shutdown::Both) {
        if e.kind() != ErrorKind::NotConnected {
            warn!("Failed to shut down {}: {}", peer, e);
        }
    }
    info!("👋 Client disconnected: {}", peer);
    Ok(())
}
