use std::{
    collections::BTreeMap,
    io::Read as _,
    path::PathBuf,
    process::{Child, Command, ExitStatus, Stdio},
    thread,
    time::{Duration, Instant},
};

use serde::Deserialize;

const EXTEDIT_PATH: &str = env!("CARGO_BIN_EXE_extedit");

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub server_version: String,
    pub session_id: String,
    pub temp_dir: PathBuf,
    pub script_count: usize,
}

/// Kills the wrapped process when dropped, unless it already exited.
pub struct KillOnDrop(pub Child);

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

/// A running `extedit serve` process listening on a free local port.
pub struct TestServeSession {
    process: KillOnDrop,
    port: u16,
    client: reqwest::blocking::Client,
}

impl TestServeSession {
    /// Starts the server with `true` as its editor, so that opening a script
    /// never leaves a window behind.
    pub fn new() -> Self {
        let port = get_port_number();

        let process = Command::new(EXTEDIT_PATH)
            .args(["serve", "--port", &port.to_string(), "--editor", "true"])
            .env_remove("RUST_LOG")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("Couldn't start extedit");

        TestServeSession {
            process: KillOnDrop(process),
            port,
            client: reqwest::blocking::Client::new(),
        }
    }

    fn url(&self, route: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, route)
    }

    pub fn wait_to_come_online(&mut self) -> ServerInfo {
        const MAX_TRIES: u32 = 50;

        for _ in 0..MAX_TRIES {
            if let Some(status) = self.process.0.try_wait().unwrap() {
                panic!("extedit exited early with status {}", status);
            }

            match self.get_info() {
                Ok(info) => return info,
                Err(_) => thread::sleep(Duration::from_millis(100)),
            }
        }

        panic!("extedit never came online");
    }

    pub fn get_info(&self) -> reqwest::Result<ServerInfo> {
        self.client.get(self.url("/info")).send()?.json()
    }

    pub fn open(&self, uuid: &str, body: &str) -> (u16, String) {
        self.post_form("/open", &[("uuid", uuid), ("body", body), ("editor", "")])
    }

    pub fn rbxedit(&self, uuid: &str, body: &str) -> (u16, String) {
        self.post_form("/rbxedit", &[("uuid", uuid), ("body", body)])
    }

    pub fn changes(&self) -> BTreeMap<String, String> {
        self.client
            .get(self.url("/changes"))
            .send()
            .unwrap()
            .json()
            .unwrap()
    }

    /// Polls `/changes` until something is reported.
    pub fn wait_for_changes(&self) -> BTreeMap<String, String> {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let changes = self.changes();
            if !changes.is_empty() {
                return changes;
            }
            assert!(Instant::now() < deadline, "no changes were reported");
            thread::sleep(Duration::from_millis(50));
        }
    }

    fn post_form(&self, route: &str, fields: &[(&str, &str)]) -> (u16, String) {
        let response = self
            .client
            .post(self.url(route))
            .header("content-type", "application/x-www-form-urlencoded")
            .body(
                url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(fields)
                    .finish(),
            )
            .send()
            .unwrap();

        (response.status().as_u16(), response.text().unwrap())
    }

    /// Sends SIGTERM and waits for the process to exit. Returns its exit
    /// status and everything it printed to stdout.
    pub fn terminate(mut self) -> (ExitStatus, String) {
        let pid = self.process.0.id().to_string();
        let killed = Command::new("kill")
            .args(["-TERM", &pid])
            .status()
            .expect("Couldn't run kill");
        assert!(killed.success());

        let deadline = Instant::now() + Duration::from_secs(10);
        let status = loop {
            if let Some(status) = self.process.0.try_wait().unwrap() {
                break status;
            }
            assert!(Instant::now() < deadline, "extedit didn't exit on SIGTERM");
            thread::sleep(Duration::from_millis(50));
        };

        let mut stdout = String::new();
        if let Some(mut pipe) = self.process.0.stdout.take() {
            pipe.read_to_string(&mut stdout).unwrap();
        }

        (status, stdout)
    }
}

fn get_port_number() -> u16 {
    let listener =
        std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind ephemeral port for test");
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}
