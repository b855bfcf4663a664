use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    sync::Arc,
};

use anyhow::Context;
use clap::Parser;

use crate::{edit_session::EditSession, web::LiveServer};

const DEFAULT_BIND_ADDRESS: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 1);
const DEFAULT_PORT: u16 = 8080;

/// Serve scripts from the remote host to local editors, and edits back.
#[derive(Debug, Parser)]
pub struct ServeCommand {
    /// The IP address to listen on.
    #[clap(long, default_value_t = IpAddr::V4(DEFAULT_BIND_ADDRESS))]
    pub address: IpAddr,

    /// The port to listen on.
    #[clap(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Editor to launch when an open request doesn't name one. Without it,
    /// scripts open with the system's default application.
    #[clap(long, env = "EXTEDIT_EDITOR")]
    pub editor: Option<String>,

    /// Also write logs to daily rolling files in this directory.
    #[clap(long)]
    pub log_dir: Option<PathBuf>,
}

impl ServeCommand {
    pub fn run(self) -> anyhow::Result<()> {
        let session = Arc::new(
            EditSession::new(self.editor).context("Failed to acquire a temporary directory")?,
        );

        println!(
            "External edit agent has acquired context. Temporary files will be stored in {}.",
            session.dir_path().display()
        );

        let addr = SocketAddr::new(self.address, self.port);
        let host = if self.address.is_loopback() {
            "localhost".to_owned()
        } else {
            self.address.to_string()
        };

        log::info!("Listening: http://{}:{}", host, self.port);

        let result = LiveServer::new(Arc::clone(&session)).start(addr);

        // Connections still being served hold their own handles, so this
        // can't wait for the last reference to drop.
        session.teardown();

        let reason = result.with_context(|| format!("Failed to serve on {}", addr))?;
        log::info!("Shut down ({:?})", reason);

        Ok(())
    }
}
