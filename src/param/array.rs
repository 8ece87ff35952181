//! `ParamsArray` - ordered, uniquely keyed parameter storage
//!
//! An array is either flat (name → param) or sorted (category → nested
//! array). [`ParamsArray::sorted`] and [`ParamsArray::unsorted`] are views:
//! they reuse the same [`ParamRef`] handles, so an edit made through one is
//! visible through the other. [`ParamsArray::copy`] is the only operation
//! that creates new parameter instances.

use indexmap::IndexMap;

use super::{sort_params, Param, ParamMap, ParamRef, PARAM_TAG};
use crate::markup::Element;
use crate::template::TemplateRegistry;

/// Category read by [`ParamsArray::start_params`] in sorted mode.
pub const BASIC_CATEGORY: &str = "Basic";

/// One entry of a [`ParamsArray`].
#[derive(Debug, Clone)]
pub enum ParamsEntry {
    /// A parameter (flat mode)
    Param(ParamRef),
    /// A nested array of one category (sorted mode)
    Category(ParamsArray),
}

/// Start or stop timing parameters, whichever are present.
#[derive(Debug, Clone, Default)]
pub struct TimingParams {
    /// `startVal` / `stopVal`
    pub value_param: Option<ParamRef>,
    /// `startType` / `stopType`
    pub type_param: Option<ParamRef>,
    /// `startEstim` / `durationEstim`
    pub expected_param: Option<ParamRef>,
}

/// Ordered mapping of parameter name to parameter.
///
/// `Clone` produces another view over the same parameters; use
/// [`ParamsArray::copy`] for independent instances.
#[derive(Debug, Clone, Default)]
pub struct ParamsArray {
    sorted: bool,
    entries: IndexMap<String, ParamsEntry>,
}

impl ParamsArray {
    /// Create an empty flat array.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the array is grouped by category.
    #[must_use]
    pub const fn is_sorted(&self) -> bool {
        self.sorted
    }

    /// Number of top-level entries (categories when sorted).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the array has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or replace the parameter stored under `name`.
    pub fn set(&mut self, name: impl Into<String>, param: ParamRef) {
        self.entries.insert(name.into(), ParamsEntry::Param(param));
    }

    /// Get the parameter stored under `name`.
    ///
    /// Returns `None` for missing keys and for category entries.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<ParamRef> {
        match self.entries.get(name) {
            Some(ParamsEntry::Param(param)) => Some(ParamRef::clone(param)),
            _ => None,
        }
    }

    /// Get the nested array of a category (sorted mode).
    #[must_use]
    pub fn category(&self, categ: &str) -> Option<&Self> {
        match self.entries.get(categ) {
            Some(ParamsEntry::Category(params)) => Some(params),
            _ => None,
        }
    }

    /// Whether an entry exists under `name`.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Remove the entry stored under `name`, keeping the order of the rest.
    pub fn remove(&mut self, name: &str) -> Option<ParamsEntry> {
        self.entries.shift_remove(name)
    }

    /// Iterate over top-level entries.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &ParamsEntry)> {
        self.entries.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    /// Every parameter in flat order, descending into categories.
    #[must_use]
    pub fn params(&self) -> Vec<(String, ParamRef)> {
        let mut out = Vec::new();
        self.collect_params(&mut out);
        out
    }

    fn collect_params(&self, out: &mut Vec<(String, ParamRef)>) {
        for (name, entry) in &self.entries {
            match entry {
                ParamsEntry::Param(param) => out.push((name.clone(), ParamRef::clone(param))),
                ParamsEntry::Category(params) => params.collect_params(out),
            }
        }
    }

    /// Deep copy: new parameter instances with the same field values.
    #[must_use]
    pub fn copy(&self) -> Self {
        let entries = self
            .entries
            .iter()
            .map(|(name, entry)| {
                let entry = match entry {
                    ParamsEntry::Param(param) => ParamsEntry::Param(param.borrow().clone().shared()),
                    ParamsEntry::Category(params) => ParamsEntry::Category(params.copy()),
                };
                (name.clone(), entry)
            })
            .collect();
        Self {
            sorted: self.sorted,
            entries,
        }
    }

    /// View grouped by category, sharing the same parameters.
    #[must_use]
    pub fn sorted(&self) -> Self {
        if self.sorted {
            return self.clone();
        }
        let flat: ParamMap = self.params().into_iter().collect();
        let entries = sort_params(&flat)
            .into_iter()
            .map(|(categ, params)| {
                let nested = Self {
                    sorted: false,
                    entries: params
                        .into_iter()
                        .map(|(name, param)| (name, ParamsEntry::Param(param)))
                        .collect(),
                };
                (categ, ParamsEntry::Category(nested))
            })
            .collect();
        Self {
            sorted: true,
            entries,
        }
    }

    /// Flat view, sharing the same parameters.
    #[must_use]
    pub fn unsorted(&self) -> Self {
        if !self.sorted {
            return self.clone();
        }
        Self {
            sorted: false,
            entries: self
                .params()
                .into_iter()
                .map(|(name, param)| (name, ParamsEntry::Param(param)))
                .collect(),
        }
    }

    /// The array that holds timing parameters in the current mode.
    fn timing_scope(&self) -> Option<&Self> {
        if self.sorted {
            self.category(BASIC_CATEGORY)
        } else {
            Some(self)
        }
    }

    fn timing(&self, value: &str, kind: &str, expected: &str) -> TimingParams {
        self.timing_scope().map_or_else(TimingParams::default, |params| TimingParams {
            value_param: params.get(value),
            type_param: params.get(kind),
            expected_param: params.get(expected),
        })
    }

    /// `startVal`, `startType` and `startEstim`, whichever are present.
    #[must_use]
    pub fn start_params(&self) -> TimingParams {
        self.timing("startVal", "startType", "startEstim")
    }

    /// `stopVal`, `stopType` and `durationEstim`, whichever are present.
    #[must_use]
    pub fn stop_params(&self) -> TimingParams {
        self.timing("stopVal", "stopType", "durationEstim")
    }

    /// Read every `Param` child of `node` into this array.
    ///
    /// Each parameter starts from the template already stored under its
    /// name, or from the registry entry for `tag`, then takes the node's
    /// attributes on top.
    pub fn read_xml(&mut self, registry: &TemplateRegistry, tag: &str, node: &Element) {
        for param_node in node.children_named(PARAM_TAG) {
            let name = param_node.attribute("name").unwrap_or_default();
            let template = match self.entries.get(name) {
                Some(ParamsEntry::Param(existing)) => existing.borrow().clone(),
                _ => Param::from_template(registry, tag, name),
            };
            let param = Param::from_xml(param_node, &template);
            self.set(name, param.shared());
        }
    }

    /// Append every parameter as a `Param` child of `node`.
    pub fn write_xml(&self, node: &mut Element) {
        for (_, param) in self.params() {
            node.push_child(param.borrow().to_xml());
        }
    }

    /// Snapshot of every parameter, keyed by name, for the interchange format.
    #[must_use]
    pub fn to_json(&self) -> IndexMap<String, Param> {
        self.params()
            .into_iter()
            .map(|(name, param)| {
                let param = param.borrow().clone();
                (name, param)
            })
            .collect()
    }

    /// Build a flat array from interchange-format parameters.
    #[must_use]
    pub fn from_json(params: &IndexMap<String, Param>) -> Self {
        params
            .iter()
            .map(|(name, param)| (name.clone(), param.clone().shared()))
            .collect()
    }
}

impl FromIterator<(String, ParamRef)> for ParamsArray {
    fn from_iter<I: IntoIterator<Item = (String, ParamRef)>>(iter: I) -> Self {
        Self {
            sorted: false,
            entries: iter
                .into_iter()
                .map(|(name, param)| (name, ParamsEntry::Param(param)))
                .collect(),
        }
    }
}
