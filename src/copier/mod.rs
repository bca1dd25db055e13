//! Copy-trading session: state transitions, event log, and the
//! connection-driving session loop.

mod event_log;
mod session;
mod state;

pub use event_log::{EventLevel, EventLog, LogEntry, EVENT_LOG_CAP};
pub use session::{authorize_master, CopySession};
pub use state::{GateRejection, SessionState};
