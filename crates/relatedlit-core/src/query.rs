//! Query strings in the search backend's boolean syntax.

/// Records that cite `recid`.
pub fn citing(recid: &str) -> String {
    format!("refersto:recid:{}", recid.trim())
}

/// Records that cite both `a` and `b`.
pub fn citing_both(a: &str, b: &str) -> String {
    format!("{} and {}", citing(a), citing(b))
}

/// The reference list of `recid`.
pub fn references_of(recid: &str) -> String {
    format!("citedby:recid:{}", recid.trim())
}

/// Whether `recid` can be embedded in a query without changing its meaning.
pub fn is_valid_recid(recid: &str) -> bool {
    let recid = recid.trim();
    !recid.is_empty()
        && recid
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}
