pub mod datetime;
pub mod document;
pub mod history;
pub mod record;
pub mod repository;
pub mod store;
pub mod sync;

pub use document::Document;
pub use history::{ActingUser, ChangeEntry, History};
pub use record::Record;
pub use repository::{Repository, SyncSummary};
pub use store::{FileStore, InMemoryStore, LocalStore};
pub use sync::{
    InMemoryRemote, MergeOutcome, PushOutcome, PushReceipt, RemoteClient, SyncError,
    SyncReconciler,
};
