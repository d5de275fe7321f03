/// Lazy, first-write-wins type construction.
///
/// Most formats declare a metric group's field set in one place (a header
/// line) and then emit data rows for many instances of the group: one row
/// per disk, per process, per transaction.  The `TypeBuilder` holds the
/// declared field template per primary id, in its post-skip-index form, and
/// materializes a frozen `DataType` for each instance the first time a
/// complete row for that instance is seen.  Once materialized a type never
/// changes (the registry enforces that).
///
/// Some formats reveal nothing before the first data row.  A template may
/// therefore be declared without fields; materialization then synthesizes
/// generic field names from the observed column count, and that count is
/// frozen like any other.
///
/// The skip-index table lists raw column positions that are per-format noise
/// (timestamp echoes, derived idle percentages that must not be modeled).
/// It is applied identically to header names and to data values, so the two
/// always stay aligned.
use crate::{DataSet, DataType, TypeKey};

use anyhow::Result;
use perfutils::Timestamp;
use std::collections::HashMap;
use tracing::debug;
use ustr::Ustr;

/// Raw column positions to discard during field-name and value extraction,
/// keyed by primary type id.

#[derive(Debug, Default)]
pub struct SkipIndex {
    map: HashMap<Ustr, Vec<usize>>,
}

impl SkipIndex {
    pub fn new() -> SkipIndex {
        SkipIndex::default()
    }

    pub fn add(&mut self, id: &str, mut indices: Vec<usize>) {
        indices.sort_unstable();
        self.map.insert(Ustr::from(id), indices);
    }

    /// Remove the skipped positions for `id` from `items`.  Works on field
    /// names and on value vectors alike.

    pub fn apply<T>(&self, id: Ustr, items: Vec<T>) -> Vec<T> {
        match self.map.get(&id) {
            None => items,
            Some(skips) => items
                .into_iter()
                .enumerate()
                .filter(|(i, _)| !skips.contains(i))
                .map(|(_, item)| item)
                .collect(),
        }
    }
}

#[derive(Debug)]
struct Template {
    name: Ustr,
    // None until the field set is known; frozen at first materialization.
    fields: Option<Vec<Ustr>>,
}

/// Per-parse registry of pending type templates.

#[derive(Debug, Default)]
pub struct TypeBuilder {
    templates: HashMap<Ustr, Template>,
}

impl TypeBuilder {
    pub fn new() -> TypeBuilder {
        TypeBuilder::default()
    }

    /// Record a field template for `id`.  `raw_fields` is the on-disk column
    /// list; the skip table is applied here, once.  First write wins.

    pub fn define(&mut self, id: &str, name: &str, raw_fields: Vec<&str>, skips: &SkipIndex) {
        let id = Ustr::from(id);
        if self.templates.contains_key(&id) {
            return;
        }
        let fields = skips
            .apply(id, raw_fields)
            .into_iter()
            .map(Ustr::from)
            .collect();
        self.templates.insert(
            id,
            Template {
                name: Ustr::from(name),
                fields: Some(fields),
            },
        );
    }

    /// Record a deferred template: the format names the group but not its
    /// fields; they will be synthesized from the first complete row.

    pub fn define_deferred(&mut self, id: &str, name: &str) {
        let id = Ustr::from(id);
        self.templates.entry(id).or_insert(Template {
            name: Ustr::from(name),
            fields: None,
        });
    }

    pub fn is_defined(&self, id: &str) -> bool {
        self.templates.contains_key(&Ustr::from(id))
    }

    /// Name and post-skip field list for `id`, if declared and known.  For
    /// parsers that build their types through the transform registry rather
    /// than `materialize`.

    pub fn template_fields(&self, id: &str) -> Option<(Ustr, Vec<Ustr>)> {
        let t = self.templates.get(&Ustr::from(id))?;
        Some((t.name, t.fields.clone()?))
    }

    pub fn field_count(&self, id: &str) -> Option<usize> {
        self.templates
            .get(&Ustr::from(id))
            .and_then(|t| t.fields.as_ref())
            .map(|f| f.len())
    }

    /// Materialize and register the type for `key` from its template, if not
    /// already present.  `ncols` is the post-skip column count of the row
    /// that triggered materialization; it is only consulted for deferred
    /// templates.  Returns the registered type.

    pub fn materialize<'a>(
        &mut self,
        set: &'a mut DataSet,
        key: TypeKey,
        ncols: usize,
    ) -> Result<&'a DataType> {
        self.materialize_with(set, key, ncols, None)
    }

    /// As `materialize`, but the resulting type is a view over a tracked
    /// process.

    pub fn materialize_for_process<'a>(
        &mut self,
        set: &'a mut DataSet,
        key: TypeKey,
        ncols: usize,
        pid: u32,
        start: Timestamp,
    ) -> Result<&'a DataType> {
        self.materialize_with(set, key, ncols, Some((pid, start)))
    }

    fn materialize_with<'a>(
        &mut self,
        set: &'a mut DataSet,
        key: TypeKey,
        ncols: usize,
        process: Option<(u32, Timestamp)>,
    ) -> Result<&'a DataType> {
        if !set.has_type(&key) {
            let id = key.id();
            let (name, fields) = match self.templates.get_mut(&id) {
                Some(template) => {
                    let fields = template
                        .fields
                        .get_or_insert_with(|| generic_fields(ncols))
                        .clone();
                    (template.name, fields)
                }
                None => (id, generic_fields(ncols)),
            };
            debug!("Lazily constructed type {key} with {} fields", fields.len());
            let ty = match process {
                Some((pid, start)) => {
                    DataType::for_process(key, name.as_str(), fields, pid, start)
                }
                None => DataType::new(key, name.as_str(), fields),
            };
            set.declare_type(ty)?;
        }
        Ok(set.resolve_type(&key)?)
    }
}

pub(crate) fn generic_fields(ncols: usize) -> Vec<Ustr> {
    (1..=ncols)
        .map(|i| Ustr::from(&format!("Field {i}")))
        .collect()
}
