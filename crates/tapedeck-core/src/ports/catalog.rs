//! Catalog resolution and format filtering ports.
//!
//! A recording identifier (`gd1977-05-08.sbd.hicks.4982.sbeok.shnf`) is
//! resolved into its candidate files; a format filter then narrows them
//! to the set that is actually queued.

use async_trait::async_trait;

use crate::download::{DownloadError, TrackFile};

/// Port for looking up the files of a recording.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait CatalogResolver: Send + Sync {
    /// Candidate files of the recording, in track order.
    async fn resolve(&self, recording_id: &str) -> Result<Vec<TrackFile>, DownloadError>;
}

/// Narrows candidate files to those worth downloading.
pub trait FormatFilter: Send + Sync {
    /// Return the subset of `candidates` to queue, given format
    /// preferences in order of preference.
    fn filter(&self, candidates: Vec<TrackFile>, preferences: &[String]) -> Vec<TrackFile>;
}

/// Picks the first preferred format that any candidate offers.
///
/// Matching is case-insensitive on the catalog's format label. With no
/// preferences, or no match, every candidate that has a format is kept.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreferredFormatFilter;

impl FormatFilter for PreferredFormatFilter {
    fn filter(&self, candidates: Vec<TrackFile>, preferences: &[String]) -> Vec<TrackFile> {
        let matches = |file: &TrackFile, wanted: &str| {
            file.format
                .as_deref()
                .is_some_and(|f| f.eq_ignore_ascii_case(wanted))
        };

        let chosen = preferences
            .iter()
            .find(|wanted| candidates.iter().any(|f| matches(f, wanted)));

        match chosen {
            Some(wanted) => candidates
                .into_iter()
                .filter(|f| matches(f, wanted))
                .collect(),
            None => candidates
                .into_iter()
                .filter(|f| f.format.is_some())
                .collect(),
        }
    }
}
