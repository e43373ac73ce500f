//! The pure decision table of §4.4 step 3, factored out of the transaction
//! so it can be property-tested without a live database (§8 property 3
//! "storage operation function").

use sitesearch_common::model::IndexOperation;

/// Inputs the decision depends on: whether a row already exists keyed by
/// `url`, whether one exists keyed by `content_hash` (URL-rename
/// detection), whether the matched document is already bound to the
/// requested site, and whether its stored hash equals the incoming one.
#[derive(Debug, Clone, Copy)]
pub struct MatchState {
    pub matched_by_url: bool,
    pub matched_by_hash: bool,
    pub already_in_requested_site: bool,
    pub hash_equal_to_stored: bool,
}

/// `store_document` is a pure function of `(url, content_hash,
/// requested_site_ids, stored_state)` (§8 property 3). This is that
/// function, independent of the database transaction wrapping it.
pub fn decide(state: MatchState) -> IndexOperation {
    if !state.matched_by_url && !state.matched_by_hash {
        return IndexOperation::New;
    }
    if !state.already_in_requested_site {
        return IndexOperation::NewSite;
    }
    if !state.hash_equal_to_stored {
        IndexOperation::Edit
    } else {
        IndexOperation::Skip
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_match_is_new() {
        let op = decide(MatchState {
            matched_by_url: false,
            matched_by_hash: false,
            already_in_requested_site: false,
            hash_equal_to_stored: false,
        });
        assert_eq!(op, IndexOperation::New);
    }

    #[test]
    fn matched_but_new_to_requested_site_is_new_site() {
        let op = decide(MatchState {
            matched_by_url: true,
            matched_by_hash: false,
            already_in_requested_site: false,
            hash_equal_to_stored: false,
        });
        assert_eq!(op, IndexOperation::NewSite);
    }

    #[test]
    fn matched_by_hash_only_and_new_site_is_new_site() {
        let op = decide(MatchState {
            matched_by_url: false,
            matched_by_hash: true,
            already_in_requested_site: false,
            hash_equal_to_stored: false,
        });
        assert_eq!(op, IndexOperation::NewSite);
    }

    #[test]
    fn same_site_changed_hash_is_edit() {
        let op = decide(MatchState {
            matched_by_url: true,
            matched_by_hash: false,
            already_in_requested_site: true,
            hash_equal_to_stored: false,
        });
        assert_eq!(op, IndexOperation::Edit);
    }

    #[test]
    fn same_site_unchanged_hash_is_skip() {
        let op = decide(MatchState {
            matched_by_url: true,
            matched_by_hash: false,
            already_in_requested_site: true,
            hash_equal_to_stored: true,
        });
        assert_eq!(op, IndexOperation::Skip);
    }
}
