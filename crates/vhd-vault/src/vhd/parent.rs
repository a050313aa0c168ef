//! Differencing-disk parent resolution: try the locator-derived relative
//! name before the dynamic header's absolute name, and reject a candidate
//! whose own footer UID doesn't match what the child expects its parent's
//! identity to be.

use vhd_core::{Error, ParentResolver, ReadSeek};

use super::opener::{self, OpenOptions, Opened};

/// A parent candidate that opened, parsed, and passed its lineage check.
pub struct ResolvedParent {
    pub stream: Box<dyn ReadSeek>,
    pub opened: Opened,
    pub used_relative_name: bool,
}

/// Try `relative_name` (if any) then `absolute_name`, in that order. A
/// candidate is accepted only if it opens, parses as a valid VHD layer, and
/// its footer UID equals `expected_parent_uid`. Returns `None` (with a
/// two-line annotation matching what the parent chain will surface to
/// callers) if no candidate satisfies all three.
pub fn resolve(
    resolver: &dyn ParentResolver,
    relative_name: Option<&str>,
    absolute_name: &str,
    expected_parent_uid: [u8; 16],
    options: &OpenOptions,
) -> (Option<ResolvedParent>, Vec<String>) {
    let candidates = relative_name
        .into_iter()
        .map(|n| (n, true))
        .chain(std::iter::once((absolute_name, false)));

    for (name, is_relative) in candidates {
        let Ok(Some(mut stream)) = resolver.open(name) else {
            continue;
        };
        let Ok(opened) = opener::open(stream.as_mut(), options) else {
            continue;
        };
        if opened.footer.uid != expected_parent_uid {
            continue;
        }
        return (
            Some(ResolvedParent { stream, opened, used_relative_name: is_relative }),
            Vec::new(),
        );
    }

    (None, vec![Error::parent_missing(absolute_name).to_string()])
}
