//! Upload lifecycle: intake into the pending area, admin decision, library publish.

mod decision;
mod intake;
mod layout;
mod models;
mod publisher;
mod schema;
mod store;

pub use decision::{DecisionEngine, DecisionError, DecisionOutcome};
pub use intake::{IntakeError, IntakeReceipt, IntakeRequest, UploadIntake};
pub use layout::{resolve_collision, sanitize_filename, LayoutError, StorageLayout};
pub use models::{Decision, MediaType, StatusChange, UploadRecord, UploadStatus};
pub use publisher::{
    move_file, LibraryFs, LibraryPublisher, LocalFs, MoveFailure, PublishError, PublishReport, RescanOutcome,
};
pub use store::{SqliteUploadStore, TransitionOutcome, UploadStore};
