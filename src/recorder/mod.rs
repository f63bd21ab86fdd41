mod bank;
mod core;
mod export;
mod journal;
mod metadata;
mod session;
#[cfg(test)]
mod tests;

pub use bank::{RecorderBank, RecorderLayout};
pub use core::{EventRecorder, RecorderState, RecorderStats, RecorderStep};
pub use export::{
    encode_video, export_clip, export_worker, extract_images, recover_journals, ExportJob,
    ExportQueue, ExportReport, ExportSettings, Exporter,
};
pub use journal::{
    clip_id_of, delete_journal, find_journals, read_journal, ClipJournal, ClipReader,
    FinalizedJournal, JournalHeader, JOURNAL_EXTENSION, JOURNAL_HEADER_SIZE,
};
pub use metadata::{metadata_path, ClipMetadata};
pub use session::{camera_slug, clip_id_for, ClipInfo, ClipSummary, RecordingSession};
