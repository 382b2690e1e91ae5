#![doc = "songbook-generator: assembles a single songbook PDF from remote documents."]

//! Pipeline: list candidate documents across source folders, apply an
//! optional metadata filter and limit, build a cover page from a remote
//! template, and merge cover, preface pages, table of contents, body
//! documents and postface pages into one PDF, reporting progress throughout.
//!
//! The remote service is reached only through [`contract::SourceClient`];
//! [`drive::DriveClient`] is the production implementation and tests run the
//! full pipeline against the generated mock.

pub mod cli;
pub mod config;
pub mod contract;
pub mod cover;
pub mod drive;
pub mod error;
pub mod filter;
pub mod load_config;
pub mod pdf;
pub mod progress;
pub mod source;
