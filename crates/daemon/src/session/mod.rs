//! Session module.
//!
//! This module attaches client connections to GNU screen sessions: the
//! directory drives the `screen` CLI, the PTY layer runs `screen -x`, and
//! connection sessions relay traffic between the two.

pub mod connection;
pub mod decoder;
pub mod directory;
pub mod pty;

pub use connection::{
    ClientEvent, CloseRequest, ConnectionSession, DetachSettings, Outbound, SessionContext,
    SessionSettings, SessionState, SHUTDOWN_REASON, UNKNOWN_EXIT_CODE,
};
pub use decoder::Utf8Decoder;
pub use directory::{
    parse_session_list, CommandOutput, CommandRunner, DirectoryError, SessionDirectory,
    SessionListing, SystemCommandRunner,
};
pub use pty::{
    NativePtySpawner, PtyEvent, PtyProcess, PtySpawner, SessionError, SpawnRequest, SpawnedPty,
    TerminalSize,
};
