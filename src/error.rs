use std::path::PathBuf;

use thiserror::Error;

/// Fatal failures of a songbook run.
///
/// Per-document and per-folder fetch problems are downgraded to warnings by
/// the lister and assembler and never show up here; everything in this enum
/// aborts the run and names the offending input.
#[derive(Error, Debug)]
pub enum SongbookError {
    #[error("invalid filter expression {expression:?}: {reason}")]
    InvalidFilterSyntax { expression: String, reason: String },

    #[error("filter field {field:?} has value {value:?}, which is not comparable as a number or date")]
    InvalidFilterValue { field: String, value: String },

    #[error("none of the source folders could be listed: {detail}")]
    SourceUnavailable { detail: String },

    #[error("downloaded cover file is corrupted: {path}. Check the template document on the remote service")]
    CorruptArtifact { path: PathBuf },

    #[error("no body documents could be fetched; refusing to write an empty songbook")]
    EmptySongbook,

    #[error("failed to write {path}: {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Hard remote-service failure outside the downgradable per-document
    /// cases (e.g. the cover template copy or export failed).
    #[error("remote service error for {file_id}: {detail}")]
    Remote { file_id: String, detail: String },

    /// The fetched pages could not be stitched into one document.
    #[error("failed to assemble songbook PDF: {detail}")]
    Assembly { detail: String },
}

pub type Result<T> = std::result::Result<T, SongbookError>;
