//! Domain model (IDs, content models, listings, job state).

pub mod ids;
pub mod listing;
pub mod model;
pub mod state;

pub use ids::{EndpointId, JobId};
pub use listing::{EntryType, ListingEntry};
pub use model::{Content, ContentFormat, ContentKind, ContentModel};
pub use state::{RemoteJobStatus, TransferRecord, TransferState};
