use std::sync::{Arc, Mutex};

use crossbeam_channel::{select, Receiver, Sender};
use jod_thread::JoinHandle;
use scriptfs::{VfsEvent, WatcherCriticalError};

use crate::{
    script_path::identifier_from_path,
    sync_state::{SyncState, WriteOrigin},
};

/// Watches for write notifications on materialized scripts and attributes
/// each one either to the user or to a remote update.
///
/// Owns the connection between the Vfs event channel and the shared
/// [`SyncState`] by holding onto another thread that processes events.
///
/// The thread runs until the event channel disconnects, which happens when
/// the Vfs watcher is closed, or until ChangeProcessor is dropped.
pub struct ChangeProcessor {
    /// Controls the runtime of the processor thread. When signaled, the job
    /// thread will finish its current event and terminate.
    ///
    /// This channel should be signaled before dropping ChangeProcessor or we'll
    /// hang forever waiting for the event loop to terminate.
    shutdown_sender: Sender<()>,

    /// A handle to the event processing thread. When dropped, we'll block
    /// until it's done.
    ///
    /// Allowed to be unused because dropping this value has side effects.
    #[allow(unused)]
    job_thread: JoinHandle<()>,
}

impl ChangeProcessor {
    /// Spin up the ChangeProcessor, connecting it to the given state and
    /// event channel. Watcher health reports, when available, are logged as
    /// they arrive.
    pub fn start(
        state: Arc<Mutex<SyncState>>,
        vfs_receiver: Receiver<VfsEvent>,
        critical_error_receiver: Option<Receiver<WatcherCriticalError>>,
    ) -> std::io::Result<Self> {
        let (shutdown_sender, shutdown_receiver) = crossbeam_channel::bounded(1);
        let critical_error_receiver =
            critical_error_receiver.unwrap_or_else(crossbeam_channel::never);
        let never = crossbeam_channel::never();
        let task = JobThreadContext { state };

        let job_thread = jod_thread::Builder::new()
            .name("ChangeProcessor thread".to_owned())
            .spawn(move || {
                log::trace!("ChangeProcessor thread started");

                let mut errors_open = true;

                loop {
                    let errors = if errors_open {
                        &critical_error_receiver
                    } else {
                        &never
                    };

                    select! {
                        recv(vfs_receiver) -> event => match event {
                            Ok(event) => task.handle_vfs_event(event),
                            Err(_) => {
                                log::trace!("Watcher closed, ChangeProcessor stopping");
                                return;
                            }
                        },
                        recv(errors) -> error => match error {
                            Ok(error) => log::warn!(
                                "{}. Edits saved around now may not be collected.",
                                error
                            ),
                            Err(_) => {
                                log::trace!("Watcher error channel closed");
                                errors_open = false;
                            }
                        },
                        recv(shutdown_receiver) -> _ => {
                            log::trace!("ChangeProcessor shutdown signal received...");
                            return;
                        },
                    }
                }
            })?;

        Ok(Self {
            shutdown_sender,
            job_thread,
        })
    }
}

impl Drop for ChangeProcessor {
    fn drop(&mut self) {
        // The thread may already be gone if the watcher closed first, in
        // which case nobody is listening and that's fine.
        let _ = self.shutdown_sender.try_send(());
    }
}

/// Contains all of the state needed to attribute write notifications.
struct JobThreadContext {
    state: Arc<Mutex<SyncState>>,
}

impl JobThreadContext {
    fn handle_vfs_event(&self, event: VfsEvent) {
        if !event.is_content_write() {
            log::trace!("Ignoring non-write event {:?}", event);
            return;
        }

        let path = event.path();
        let Some(identifier) = identifier_from_path(path) else {
            log::trace!("Ignoring write to non-script path {}", path.display());
            return;
        };

        let origin = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.record_write(&identifier)
        };

        match origin {
            WriteOrigin::Echo => log::debug!("{} was written by the remote host", identifier),
            WriteOrigin::UserEdit => log::info!("{} was edited", identifier),
            WriteOrigin::Unregistered => log::debug!(
                "Ignoring write to {}, no script is registered as {}",
                path.display(),
                identifier
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        path::PathBuf,
        thread,
        time::{Duration, Instant},
    };

    use super::*;
    use crate::registry::Script;

    /// Registered in every test state. Its echo is sent after the events under
    /// test, so once it is consumed everything before it has been handled.
    const SENTINEL: &str = "sentinel";

    fn registered(identifiers: &[&str]) -> Arc<Mutex<SyncState>> {
        let mut state = SyncState::new();
        for identifier in identifiers.iter().chain(&[SENTINEL]) {
            state
                .registry
                .insert(Script::new(
                    identifier.to_string(),
                    PathBuf::from(format!("/t/{}.lua", identifier)),
                ))
                .unwrap();
        }
        Arc::new(Mutex::new(state))
    }

    /// Sends the events followed by the sentinel's echo, and returns once the
    /// processor has handled all of them.
    fn process(state: &Arc<Mutex<SyncState>>, events: Vec<VfsEvent>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let processor = ChangeProcessor::start(Arc::clone(state), receiver, None).unwrap();

        state.lock().unwrap().suppression.mark_suppressed(SENTINEL);
        for event in events {
            sender.send(event).unwrap();
        }
        sender
            .send(VfsEvent::Write(PathBuf::from(format!("/t/{}.lua", SENTINEL))))
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while state.lock().unwrap().suppression.is_suppressed(SENTINEL) {
            assert!(Instant::now() < deadline, "events were never processed");
            thread::sleep(Duration::from_millis(1));
        }

        drop(processor);
    }

    #[test]
    fn user_writes_become_pending() {
        let state = registered(&["a1"]);

        process(&state, vec![VfsEvent::Write(PathBuf::from("/t/a1.lua"))]);

        assert!(state.lock().unwrap().pending.is_pending("a1"));
    }

    #[test]
    fn echoes_are_swallowed() {
        let state = registered(&["a1"]);
        state.lock().unwrap().suppression.mark_suppressed("a1");

        process(&state, vec![VfsEvent::Write(PathBuf::from("/t/a1.lua"))]);

        let state = state.lock().unwrap();
        assert!(state.pending.is_empty());
        assert!(state.suppression.is_empty());
    }

    #[test]
    fn removals_and_foreign_paths_are_ignored() {
        let state = registered(&["a1"]);

        process(
            &state,
            vec![
                VfsEvent::Remove(PathBuf::from("/t/a1.lua")),
                VfsEvent::Write(PathBuf::from("/t/a1.lua.swp")),
                VfsEvent::Write(PathBuf::from("/t/ghost.lua")),
            ],
        );

        assert!(state.lock().unwrap().pending.is_empty());
    }

    #[test]
    fn processor_stops_when_channel_disconnects() {
        let state = registered(&[]);
        let (sender, receiver) = crossbeam_channel::unbounded::<VfsEvent>();
        let processor = ChangeProcessor::start(state, receiver, None).unwrap();

        drop(sender);

        // Dropping joins the thread; this would hang if the loop kept going.
        drop(processor);
    }
}
