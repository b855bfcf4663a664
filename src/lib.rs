//! A local bridge that lets scripts living in a remote host be edited with
//! any desktop editor.
//!
//! The remote host pushes a script in, it is written to a temporary file and
//! opened in an editor. Edits the user saves are picked up by a file watcher
//! and handed back when the host polls; content the host pushes later is
//! written without being reported back as an edit.

pub mod cli;
pub mod logging;

mod change_processor;
mod edit_session;
mod editor;
mod pending;
mod registry;
mod script_path;
mod session_id;
mod suppression;
mod sync_state;
mod web;

pub use edit_session::{EditSession, OpenOutcome, Registration, SessionError, SessionStats};
pub use editor::{EditorLauncher, ProcessLauncher};
pub use script_path::{identifier_from_path, script_path, SCRIPT_EXTENSION};
pub use session_id::SessionId;
pub use web::{interface as web_api, LiveServer};
