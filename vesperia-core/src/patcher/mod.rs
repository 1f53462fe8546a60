//! Writes patch sections into working copies of the game archives.
//!
//! Every patcher follows the same shape: read the original record from the
//! archive, overlay the patch delta, write the result back to the offset the
//! record came from. Nothing is written until every key in the section has
//! been matched to a record.

pub mod artes;
pub mod chests;
pub mod items;
pub mod search;
pub mod shops;
pub mod skills;

use std::fmt::Display;

use crate::{Result, VesperiaError};

pub(crate) fn unknown_key(domain: &'static str, key: impl ToString) -> VesperiaError {
    VesperiaError::UnknownPatchKey {
        domain,
        key: key.to_string(),
    }
}

/// Fails when a delta rewrote a field that locates the record in its table.
pub(crate) fn keep_structural<T: PartialEq + Display>(
    domain: &str,
    entry: impl Display,
    field: &str,
    original: T,
    merged: T,
) -> Result<()> {
    if original != merged {
        return Err(VesperiaError::InvalidPatch(format!(
            "{domain} entry {entry} cannot change {field} from {original} to {merged}"
        )));
    }
    Ok(())
}
