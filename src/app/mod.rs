pub mod context;
pub mod error;

pub use context::AppContext;
pub use error::{
    CacheFailure, ExtractionFailure, FailureKind, FolioError, Result, SchedulingFailure,
    TransportFailure,
};
