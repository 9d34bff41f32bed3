pub mod types;

pub use types::{
    ContentRecord, ContentRecordView, ContentType, IndexGeneration, RecordFields, ScoredRecord,
};
