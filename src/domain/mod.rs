pub mod record;
pub mod source;
pub mod sync_run;

pub use record::{Candidate, ContentRecord};
pub use source::{
    ExtractionRules, Source, SourceKind, SourceMeta, SourceUpdate, SyncPolicy, Validators,
};
pub use sync_run::{SyncCounts, SyncOutcome, SyncRun};
