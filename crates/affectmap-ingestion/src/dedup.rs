//! Work deduplication and profile merging.
//!
//! The same logical paper shows up under multiple external IDs (preprint vs.
//! published version), so works are keyed by normalized title and the best
//! record wins under a deterministic preference chain. The chain is a total
//! order: any permutation of competing records selects the same winner.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::models::Work;

/// The canonical preprint repository; among two preprints the one hosted
/// here is preferred.
const CANONICAL_PREPRINT_VENUE: &str = "arXiv";

/// True when `candidate` should replace `incumbent` for the same title key.
pub fn prefer(candidate: &Work, incumbent: &Work) -> bool {
    compare(candidate, incumbent) == Ordering::Greater
}

/// Tie-break chain, applied in order until a difference is found:
/// published over preprint, canonical preprint repository, venue-type
/// priority, citation count, publication date, external ID.
pub fn compare(a: &Work, b: &Work) -> Ordering {
    published_rank(a)
        .cmp(&published_rank(b))
        .then_with(|| canonical_preprint_rank(a).cmp(&canonical_preprint_rank(b)))
        .then_with(|| a.venue_type.priority().cmp(&b.venue_type.priority()))
        .then_with(|| a.cited_by_count.cmp(&b.cited_by_count))
        .then_with(|| a.publication_date.cmp(&b.publication_date))
        .then_with(|| a.id.cmp(&b.id))
}

fn published_rank(w: &Work) -> u8 {
    u8::from(!w.is_preprint)
}

fn canonical_preprint_rank(w: &Work) -> u8 {
    u8::from(w.is_preprint && w.venue.as_deref() == Some(CANONICAL_PREPRINT_VENUE))
}

/// Merge previously persisted works with freshly analyzed ones: exactly one
/// work per normalized title key, fresh records replacing prior ones only
/// when the tie-break prefers them. Output is sorted newest first.
pub fn merge_works(previous: Vec<Work>, fresh: Vec<Work>) -> Vec<Work> {
    let mut by_title: HashMap<String, Work> = HashMap::new();

    for work in previous.into_iter().chain(fresh) {
        let key = work.title_key();
        match by_title.get(&key) {
            Some(incumbent) if !prefer(&work, incumbent) => {}
            _ => {
                by_title.insert(key, work);
            }
        }
    }

    let mut merged: Vec<Work> = by_title.into_values().collect();
    sort_for_output(&mut merged);
    merged
}

/// Publication date descending, falling back to publication year, with the
/// external ID as a stable final key.
pub fn sort_for_output(works: &mut [Work]) {
    works.sort_by(|a, b| {
        let date = b.publication_date.cmp(&a.publication_date);
        let year = b.publication_year.cmp(&a.publication_year);
        date.then(year).then_with(|| a.id.cmp(&b.id))
    });
}
