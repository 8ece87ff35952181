//! Category grouping of parameter maps
//!
//! Both directions only move handles around: the grouped and flat maps
//! share the same [`Param`](super::Param) instances.

use indexmap::IndexMap;

use super::ParamRef;

/// Flat mapping of parameter name to parameter.
pub type ParamMap = IndexMap<String, ParamRef>;

/// Parameters grouped by category, then keyed by name.
pub type SortedParamMap = IndexMap<String, ParamMap>;

/// Group parameters by their category.
///
/// Categories appear in order of first use; parameters without a declared
/// category are grouped under the empty string.
#[must_use]
pub fn sort_params(params: &ParamMap) -> SortedParamMap {
    let mut sorted = SortedParamMap::new();
    for (name, param) in params {
        let categ = param.borrow().categ.clone().unwrap_or_default();
        sorted
            .entry(categ)
            .or_default()
            .insert(name.clone(), ParamRef::clone(param));
    }
    sorted
}

/// Flatten category groups back into a single map.
#[must_use]
pub fn unsort_params(sorted: &SortedParamMap) -> ParamMap {
    sorted
        .values()
        .flat_map(|params| params.iter())
        .map(|(name, param)| (name.clone(), ParamRef::clone(param)))
        .collect()
}
