//! Partition a filter into the part the server evaluates and the part
//! evaluated after decoding.

use super::Filter;

/// Result of [`split_filter`]. `server AND local` is equivalent to the input.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterSplit {
    /// Sent on the wire; `Include` when nothing is.
    pub server: Filter,
    /// Re-applied to decoded features; `Include` when nothing remains.
    pub local: Filter,
}

impl FilterSplit {
    /// Whether decoded features still need local evaluation.
    pub fn needs_local(&self) -> bool {
        !self.local.is_include()
    }
}

/// Conservative split: identifier sets and a single bounding box go to the
/// server, every other shape is evaluated locally.
///
/// Only the top level and the direct children of a top-level `And` are
/// considered. An identifier set inside an `And` stays local, since the
/// identifier parameter cannot be combined with a filter.
pub fn split_filter(filter: &Filter) -> FilterSplit {
    match filter {
        Filter::Include => FilterSplit {
            server: Filter::Include,
            local: Filter::Include,
        },
        Filter::Exclude => FilterSplit {
            server: Filter::Exclude,
            local: Filter::Include,
        },
        Filter::Id(_) | Filter::BBox { .. } => FilterSplit {
            server: filter.clone(),
            local: Filter::Include,
        },
        Filter::And(children) => {
            let mut server = None;
            let mut local = Vec::with_capacity(children.len());
            for child in children {
                match child {
                    Filter::BBox { .. } if server.is_none() => server = Some(child.clone()),
                    other => local.push(other.clone()),
                }
            }
            FilterSplit {
                server: server.unwrap_or(Filter::Include),
                local: Filter::and(local),
            }
        }
        other => FilterSplit {
            server: Filter::Include,
            local: other.clone(),
        },
    }
}
