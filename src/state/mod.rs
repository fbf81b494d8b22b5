//! Persistent updater state: the installed version record and the journal
//! of the attempt currently in flight.

pub mod journal;
pub mod version_store;

pub use journal::{JournalEntry, JournalPhase, UpdateJournal};
pub use version_store::VersionStore;
