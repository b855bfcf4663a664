//! Defines the bridge's web interface. This is what the remote host, usually
//! the Roblox Studio plugin, communicates with.

mod api;
pub mod interface;
mod util;

use std::{convert::Infallible, io, net::SocketAddr, sync::Arc, time::Duration};

use hyper::{body::Incoming, server::conn::http1, service::service_fn, Request};
use hyper_util::rt::TokioIo;
use tokio::{net::TcpListener, runtime::Runtime};

use crate::edit_session::EditSession;

use self::interface::ServerExitReason;

const MAX_BIND_ATTEMPTS: u32 = 5;
const BASE_BACKOFF_MS: u64 = 200;

pub struct LiveServer {
    session: Arc<EditSession>,
}

impl LiveServer {
    pub fn new(session: Arc<EditSession>) -> Self {
        LiveServer { session }
    }

    /// Serves requests on `address` until the process is asked to stop.
    /// Blocks the calling thread on its own runtime.
    pub fn start(self, address: SocketAddr) -> io::Result<ServerExitReason> {
        let rt = Runtime::new()?;
        rt.block_on(self.serve(address))
    }

    async fn serve(self, address: SocketAddr) -> io::Result<ServerExitReason> {
        let listener = bind_with_retry(address).await?;
        log::debug!("Listening on {}", listener.local_addr()?);

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, peer) = match result {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            log::warn!("Couldn't accept connection: {}", err);
                            continue;
                        }
                    };
                    log::trace!("Accepted connection from {}", peer);

                    let io = TokioIo::new(stream);
                    let session = Arc::clone(&self.session);

                    tokio::spawn(async move {
                        let service = service_fn(move |req: Request<Incoming>| {
                            let session = Arc::clone(&session);
                            async move { Ok::<_, Infallible>(api::call(session, req).await) }
                        });

                        if let Err(err) = http1::Builder::new()
                            .serve_connection(io, service)
                            .await
                        {
                            log::error!("Error serving connection: {err}");
                        }
                    });
                }
                reason = &mut shutdown => {
                    log::debug!("Stopping server: {:?}", reason);
                    return Ok(reason);
                }
            }
        }
    }
}

/// Binds the listener, retrying with exponential backoff while the address is
/// still held by a previous run.
async fn bind_with_retry(address: SocketAddr) -> io::Result<TcpListener> {
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match TcpListener::bind(address).await {
            Ok(listener) => return Ok(listener),
            Err(err) if err.kind() == io::ErrorKind::AddrInUse && attempts < MAX_BIND_ATTEMPTS => {
                let delay = BASE_BACKOFF_MS * 2u64.pow(attempts - 1);
                log::warn!(
                    "Port {} in use, retrying in {}ms (attempt {}/{})",
                    address.port(),
                    delay,
                    attempts,
                    MAX_BIND_ATTEMPTS
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            Err(err) => {
                return Err(io::Error::new(
                    err.kind(),
                    format!(
                        "failed to bind to {}: {} (after {} attempts)",
                        address, err, attempts
                    ),
                ))
            }
        }
    }
}

/// Resolves once the process receives Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() -> ServerExitReason {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => tokio::select! {
                _ = interrupted() => ServerExitReason::Interrupted,
                _ = terminate.recv() => ServerExitReason::Terminated,
            },
            Err(err) => {
                log::warn!("Couldn't listen for SIGTERM: {}", err);
                interrupted().await;
                ServerExitReason::Interrupted
            }
        }
    }

    #[cfg(not(unix))]
    {
        interrupted().await;
        ServerExitReason::Interrupted
    }
}

async fn interrupted() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        log::error!("Couldn't listen for Ctrl-C: {}", err);
        std::future::pending::<()>().await;
    }
}
