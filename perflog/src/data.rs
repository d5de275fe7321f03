/// The uniform in-memory model that every format parser produces.
///
/// A `DataSet` is the normalized result of parsing one source file: hostname
/// and free-form metadata, a registry of `DataType`s (the typed metric
/// groups), the time-ordered `DataRecord`s, and the list of tracked
/// `Process`es.  All of it is built during one parse call and is immutable
/// afterwards; downstream consumers (charting, statistics) only read.
///
/// Model invariants:
///
/// - types are unique by (id, sub-id); redeclaring an identical type is a
///   no-op, redeclaring with a different arity is an error
/// - every type key stored in any record resolves in the set's registry
///   (records only accept values through a resolved `&DataType`)
/// - every stored vector's length equals its type's field-name count; short
///   rows are padded with 0.0 and long rows truncated, both logged
/// - record times are non-decreasing, except where a parser's lenient
///   interval recovery synthesizes a corrected time (logged by the parser)
///
/// Space matters here: a day of ESXTop data is easily a million values.
/// Type ids, field names, hostnames and marks are interned `Ustr`s, and the
/// per-record vectors are plain `Vec<f64>` keyed by type.
use crate::Process;

use perfutils::Timestamp;
use std::collections::HashMap;
use tracing::warn;
use ustr::Ustr;

/// Identity of a metric group: a plain id, or an id plus a sub-id for
/// per-instance groups (one disk among several, one tracked process).

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKey {
    Plain(Ustr),
    Sub(Ustr, Ustr),
}

impl TypeKey {
    pub fn plain(id: &str) -> TypeKey {
        TypeKey::Plain(Ustr::from(id))
    }

    pub fn sub(id: &str, sub_id: &str) -> TypeKey {
        TypeKey::Sub(Ustr::from(id), Ustr::from(sub_id))
    }

    pub fn id(&self) -> Ustr {
        match self {
            TypeKey::Plain(id) => *id,
            TypeKey::Sub(id, _) => *id,
        }
    }

    pub fn sub_id(&self) -> Option<Ustr> {
        match self {
            TypeKey::Plain(_) => None,
            TypeKey::Sub(_, sub) => Some(*sub),
        }
    }
}

impl std::fmt::Display for TypeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            TypeKey::Plain(id) => write!(f, "{id}"),
            TypeKey::Sub(id, sub) => write!(f, "{id} ({sub})"),
        }
    }
}

/// Registry errors.  These are concrete (not anyhow strings) so that callers
/// and tests can discriminate duplicate-arity conflicts from unknown-type
/// lookups; they convert into `anyhow::Error` via `?` as usual.

#[derive(Debug, PartialEq, Eq)]
pub enum TypeError {
    Duplicate(TypeKey),
    Unknown(TypeKey),
}

impl std::fmt::Display for TypeError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            TypeError::Duplicate(key) => {
                write!(f, "Type {key} already declared with a different arity")
            }
            TypeError::Unknown(key) => write!(f, "Unknown type {key}"),
        }
    }
}

impl std::error::Error for TypeError {}

/// A named group of related metric fields.  The field list is fixed at
/// construction and equals the length of every vector recorded against the
/// type.

#[derive(Debug, Clone)]
pub struct DataType {
    key: TypeKey,
    name: Ustr,
    fields: Vec<Ustr>,
    // For process-typed groups, the identity of the tracked process this
    // type is a view over.  A key into DataSet::processes, not an owner.
    process: Option<(u32, Timestamp)>,
}

impl DataType {
    pub fn new(key: TypeKey, name: &str, fields: Vec<Ustr>) -> DataType {
        DataType {
            key,
            name: Ustr::from(name),
            fields,
            process: None,
        }
    }

    pub fn for_process(
        key: TypeKey,
        name: &str,
        fields: Vec<Ustr>,
        pid: u32,
        start: Timestamp,
    ) -> DataType {
        DataType {
            key,
            name: Ustr::from(name),
            fields,
            process: Some((pid, start)),
        }
    }

    pub fn key(&self) -> TypeKey {
        self.key
    }

    pub fn id(&self) -> Ustr {
        self.key.id()
    }

    pub fn sub_id(&self) -> Option<Ustr> {
        self.key.sub_id()
    }

    pub fn name(&self) -> Ustr {
        self.name
    }

    pub fn fields(&self) -> &[Ustr] {
        &self.fields
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.as_str() == name)
    }

    pub fn process(&self) -> Option<(u32, Timestamp)> {
        self.process
    }
}

/// All metric values sampled at one timestamp.  The mark is the source
/// file's own reference for the sampling interval (NMON's `T0001`); formats
/// without such a token use the rendered timestamp.

#[derive(Debug)]
pub struct DataRecord {
    timestamp: Timestamp,
    mark: Ustr,
    data: HashMap<TypeKey, Vec<f64>>,
}

impl DataRecord {
    pub fn new(timestamp: Timestamp, mark: &str) -> DataRecord {
        DataRecord {
            timestamp,
            mark: Ustr::from(mark),
            data: HashMap::new(),
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn mark(&self) -> Ustr {
        self.mark
    }

    /// Attach a value vector for `ty`, enforcing the arity invariant: short
    /// vectors are padded with 0.0 and long ones truncated, both logged as
    /// recoverable anomalies.

    pub fn set(&mut self, ty: &DataType, mut values: Vec<f64>) {
        let want = ty.num_fields();
        if values.len() < want {
            warn!(
                "{}: {} of {} columns at {}, padding with zeroes",
                ty.key(),
                values.len(),
                want,
                self.mark
            );
            values.resize(want, 0.0);
        } else if values.len() > want {
            warn!(
                "{}: {} extra columns at {}, truncating",
                ty.key(),
                values.len() - want,
                self.mark
            );
            values.truncate(want);
        }
        self.data.insert(ty.key(), values);
    }

    pub fn has(&self, key: &TypeKey) -> bool {
        self.data.contains_key(key)
    }

    pub fn values(&self, key: &TypeKey) -> Option<&[f64]> {
        self.data.get(key).map(|v| v.as_slice())
    }

    /// Fetch one field by name.  None if the type is absent from this record
    /// or the field is not declared.

    pub fn value(&self, ty: &DataType, field: &str) -> Option<f64> {
        let values = self.data.get(&ty.key())?;
        Some(values[ty.field_index(field)?])
    }

    pub fn keys(&self) -> impl Iterator<Item = &TypeKey> {
        self.data.keys()
    }

    // The two mutators below are for the ingestion pipeline only (whole-set
    // post-processing, process-split redirection); the record is immutable
    // once the parse call returns.

    pub(crate) fn values_mut(&mut self, key: &TypeKey) -> Option<&mut Vec<f64>> {
        self.data.get_mut(key)
    }

    pub(crate) fn remove(&mut self, key: &TypeKey) -> Option<Vec<f64>> {
        self.data.remove(key)
    }
}

/// The root aggregate returned to callers.

#[derive(Debug, Default)]
pub struct DataSet {
    hostname: Ustr,
    metadata: HashMap<Ustr, String>,
    types: HashMap<TypeKey, DataType>,
    records: Vec<DataRecord>,
    processes: Vec<Process>,
}

impl DataSet {
    pub fn new() -> DataSet {
        DataSet::default()
    }

    pub fn hostname(&self) -> Ustr {
        self.hostname
    }

    pub fn set_hostname(&mut self, hostname: &str) {
        self.hostname = Ustr::from(hostname);
    }

    pub fn set_metadata(&mut self, key: &str, value: &str) {
        self.metadata.insert(Ustr::from(key), value.to_string());
    }

    /// Append to a metadata value, for the multi-line free-text blocks
    /// (NMON BBB/BBBP).

    pub fn append_metadata(&mut self, key: &str, line: &str) {
        let entry = self.metadata.entry(Ustr::from(key)).or_default();
        if !entry.is_empty() {
            entry.push('\n');
        }
        entry.push_str(line);
    }

    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(&Ustr::from(key)).map(|s| s.as_str())
    }

    pub fn metadata_iter(&self) -> impl Iterator<Item = (&Ustr, &String)> {
        self.metadata.iter()
    }

    /// Declare a type.  Idempotent if an identical-arity type with this key
    /// already exists (first declaration wins); a different arity is a
    /// conflict.

    pub fn declare_type(&mut self, ty: DataType) -> Result<&DataType, TypeError> {
        let key = ty.key();
        if let Some(existing) = self.types.get(&key) {
            if existing.num_fields() != ty.num_fields() {
                return Err(TypeError::Duplicate(key));
            }
        } else {
            self.types.insert(key, ty);
        }
        Ok(&self.types[&key])
    }

    pub fn resolve_type(&self, key: &TypeKey) -> Result<&DataType, TypeError> {
        self.types.get(key).ok_or(TypeError::Unknown(*key))
    }

    pub fn has_type(&self, key: &TypeKey) -> bool {
        self.types.contains_key(key)
    }

    pub fn types(&self) -> impl Iterator<Item = &DataType> {
        self.types.values()
    }

    /// All types with the given primary id, e.g. every disk instance of
    /// `Device`.  Order is unspecified.

    pub fn types_with_id(&self, id: &str) -> Vec<&DataType> {
        let id = Ustr::from(id);
        self.types.values().filter(|t| t.id() == id).collect()
    }

    pub fn add_record(&mut self, record: DataRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[DataRecord] {
        &self.records
    }

    pub(crate) fn records_mut(&mut self) -> &mut [DataRecord] {
        &mut self.records
    }

    pub fn last_record_time(&self) -> Option<Timestamp> {
        self.records.last().map(|r| r.timestamp())
    }

    pub fn add_process(&mut self, process: Process) {
        self.processes.push(process);
    }

    pub fn processes(&self) -> &[Process] {
        &self.processes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perfutils::timestamp_from_ymdhms;

    fn fields(names: &[&str]) -> Vec<Ustr> {
        names.iter().map(|n| Ustr::from(n)).collect()
    }

    #[test]
    fn test_declare_type_idempotent() {
        let mut set = DataSet::new();
        let key = TypeKey::plain("CPU_ALL");
        set.declare_type(DataType::new(key, "CPU Total", fields(&["User%", "Sys%"])))
            .unwrap();
        // Identical redeclaration: no error, no second type.
        set.declare_type(DataType::new(key, "CPU Total", fields(&["User%", "Sys%"])))
            .unwrap();
        assert!(set.types().count() == 1);
        // Same key, different arity: conflict.
        let r = set.declare_type(DataType::new(key, "CPU Total", fields(&["User%"])));
        assert!(matches!(r, Err(TypeError::Duplicate(_))));
    }

    #[test]
    fn test_resolve_type() {
        let mut set = DataSet::new();
        let key = TypeKey::sub("Device", "sda");
        assert!(matches!(set.resolve_type(&key), Err(TypeError::Unknown(_))));
        set.declare_type(DataType::new(key, "Device", fields(&["r/s", "w/s"])))
            .unwrap();
        let ty = set.resolve_type(&key).unwrap();
        assert!(ty.field_index("w/s") == Some(1));
        assert!(ty.field_index("gone").is_none());
    }

    #[test]
    fn test_record_arity_enforcement() {
        let ty = DataType::new(
            TypeKey::plain("MEM"),
            "Memory",
            fields(&["total", "free", "cached"]),
        );
        let t = timestamp_from_ymdhms(2013, 8, 15, 10, 0, 0);

        // Short row: padded with zeroes.
        let mut rec = DataRecord::new(t, "T0001");
        rec.set(&ty, vec![1.0, 2.0]);
        assert!(rec.values(&ty.key()).unwrap() == [1.0, 2.0, 0.0]);

        // Long row: truncated.
        let mut rec = DataRecord::new(t, "T0002");
        rec.set(&ty, vec![1.0, 2.0, 3.0, 4.0]);
        assert!(rec.values(&ty.key()).unwrap() == [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_record_field_lookup() {
        let ty = DataType::new(TypeKey::plain("MEM"), "Memory", fields(&["total", "free"]));
        let t = timestamp_from_ymdhms(2013, 8, 15, 10, 0, 0);
        let mut rec = DataRecord::new(t, "T0001");
        rec.set(&ty, vec![16.0, 4.0]);
        assert!(rec.value(&ty, "free") == Some(4.0));
        assert!(rec.value(&ty, "nope").is_none());
    }

    #[test]
    fn test_metadata_append() {
        let mut set = DataSet::new();
        set.append_metadata("BBBP", "uname -a");
        set.append_metadata("BBBP", "Linux host 2.6.32");
        assert!(set.metadata("BBBP") == Some("uname -a\nLinux host 2.6.32"));
    }
}
