/// Derivations that need more context than a single raw line.
///
/// Two flavors, both part of the ingestion pipeline:
///
/// - per-record post-processors run immediately before a record is sealed
///   and derive new data purely from that record's own fields (summing the
///   per-interface network groups into a Total group).  A record missing
///   the inputs is a partial sample, expected and only logged at debug.
///
/// - whole-data-set post-processors run once after all records are
///   ingested, because they need information not available at
///   single-record time: process CPU percentages are scaled by the number
///   of concurrently observed CPUs, and that count can legitimately change
///   over the life of a file (DLPAR, hot-add), so the factor is recomputed
///   per record.  This pass mutates already-stored vectors in place; that
///   is allowed exactly because it is ingestion, not a downstream consumer.
use crate::{DataRecord, DataSet, DataType, TypeKey};

use tracing::{debug, warn};
use ustr::Ustr;

pub trait RecordPostprocessor {
    fn process(&self, set: &mut DataSet, record: &mut DataRecord);
}

pub trait DataSetPostprocessor {
    fn process(&self, set: &mut DataSet);
}

/// Ordered collections of post-processors for one parse call.

pub struct PostprocessorRegistry {
    per_record: Vec<Box<dyn RecordPostprocessor>>,
    whole_set: Vec<Box<dyn DataSetPostprocessor>>,
}

impl PostprocessorRegistry {
    pub fn new() -> PostprocessorRegistry {
        PostprocessorRegistry {
            per_record: vec![],
            whole_set: vec![],
        }
    }

    pub fn register_record(&mut self, p: Box<dyn RecordPostprocessor>) {
        self.per_record.push(p);
    }

    pub fn register_set(&mut self, p: Box<dyn DataSetPostprocessor>) {
        self.whole_set.push(p);
    }

    /// Run the per-record chain; called by the assembler as it seals a
    /// record.

    pub fn run_record(&self, set: &mut DataSet, record: &mut DataRecord) {
        for p in &self.per_record {
            p.process(set, record);
        }
    }

    /// Run the whole-set chain; called once after ingestion.

    pub fn run_set(&self, set: &mut DataSet) {
        for p in &self.whole_set {
            p.process(set);
        }
    }
}

/// Sum every sub-typed instance of the configured ids into one synthetic
/// `<id> (Total)` plain type.  Field-wise: NaN cells are treated as missing
/// and left out; a column that is missing everywhere stays NaN.

pub struct SubTypeTotal {
    ids: Vec<Ustr>,
}

impl SubTypeTotal {
    pub fn new(ids: &[&str]) -> SubTypeTotal {
        SubTypeTotal {
            ids: ids.iter().map(|id| Ustr::from(id)).collect(),
        }
    }
}

impl RecordPostprocessor for SubTypeTotal {
    fn process(&self, set: &mut DataSet, record: &mut DataRecord) {
        for &id in &self.ids {
            // The instances present in this record, in registry order.
            let mut fields: Option<Vec<Ustr>> = None;
            let mut total: Vec<f64> = vec![];
            for ty in set.types_with_id(id.as_str()) {
                if ty.sub_id().is_none() {
                    continue;
                }
                let values = match record.values(&ty.key()) {
                    Some(v) => v,
                    None => continue,
                };
                if fields.is_none() {
                    fields = Some(ty.fields().to_vec());
                    total = vec![f64::NAN; values.len()];
                }
                for (acc, v) in total.iter_mut().zip(values.iter()) {
                    if !v.is_nan() {
                        *acc = if acc.is_nan() { *v } else { *acc + *v };
                    }
                }
            }
            let fields = match fields {
                Some(f) => f,
                None => {
                    debug!("No {id} instances in record at {}, no total", record.mark());
                    continue;
                }
            };
            let key = TypeKey::plain(&format!("{id} (Total)"));
            match set.declare_type(DataType::new(key, &format!("{id} (Total)"), fields)) {
                Ok(ty) => {
                    let ty = ty.clone();
                    record.set(&ty, total);
                }
                Err(e) => warn!("Cannot build total type for {id}: {e}"),
            }
        }
    }
}

/// NMON keeps all network interfaces as columns of one NET group
/// (`eth0-read-KB/s`, `eth0-write-KB/s`, ...).  Sum the read columns and
/// the write columns into a two-field `NET (Total)` type so consumers get
/// total throughput without knowing the interface list.

pub struct NetColumnTotal;

impl RecordPostprocessor for NetColumnTotal {
    fn process(&self, set: &mut DataSet, record: &mut DataRecord) {
        let net_key = TypeKey::plain("NET");
        let (read_ix, write_ix) = match set.resolve_type(&net_key) {
            Ok(ty) => {
                let mut read_ix = vec![];
                let mut write_ix = vec![];
                for (i, f) in ty.fields().iter().enumerate() {
                    if f.as_str().contains("-read") {
                        read_ix.push(i);
                    } else if f.as_str().contains("-write") {
                        write_ix.push(i);
                    }
                }
                (read_ix, write_ix)
            }
            Err(_) => {
                debug!("No NET group in this set, no network total");
                return;
            }
        };
        let values = match record.values(&net_key) {
            Some(v) => v,
            None => {
                debug!("No NET data in record at {}, no network total", record.mark());
                return;
            }
        };
        let sum = |ix: &[usize]| -> f64 {
            ix.iter()
                .map(|&i| values[i])
                .filter(|v| !v.is_nan())
                .sum()
        };
        let total = vec![sum(&read_ix), sum(&write_ix)];
        let key = TypeKey::plain("NET (Total)");
        let fields = vec![Ustr::from("read-KB/s"), Ustr::from("write-KB/s")];
        match set.declare_type(DataType::new(key, "Network Total", fields)) {
            Ok(ty) => {
                let ty = ty.clone();
                record.set(&ty, total);
            }
            Err(e) => warn!("Cannot build network total type: {e}"),
        }
    }
}

/// Scale process CPU percentage fields by the concurrently-observed CPU
/// count, so that 100% means "the whole machine" rather than "one core".
/// The count is taken per record from the CPU_ALL group's CPUs column,
/// falling back to the `cpus` metadatum; records with no count in sight are
/// left untouched.

pub struct ProcessCpuScale {
    scaled_fields: Vec<Ustr>,
}

impl ProcessCpuScale {
    pub fn new() -> ProcessCpuScale {
        ProcessCpuScale {
            scaled_fields: ["%CPU", "%Usr", "%Sys"].iter().map(|f| Ustr::from(f)).collect(),
        }
    }
}

impl DataSetPostprocessor for ProcessCpuScale {
    fn process(&self, set: &mut DataSet) {
        // Pre-resolve everything that needs the registry, then walk the
        // records mutably.
        let cpu_count_source = set
            .resolve_type(&TypeKey::plain("CPU_ALL"))
            .ok()
            .and_then(|ty| ty.field_index("CPUs").map(|i| (ty.key(), i)));
        let fallback = set
            .metadata("cpus")
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse::<f64>().ok());
        let targets: Vec<(TypeKey, Vec<usize>)> = set
            .types()
            .filter(|ty| ty.process().is_some())
            .map(|ty| {
                let indices = self
                    .scaled_fields
                    .iter()
                    .filter_map(|f| ty.field_index(f.as_str()))
                    .collect();
                (ty.key(), indices)
            })
            .collect();
        if targets.is_empty() {
            return;
        }

        for record in set.records_mut() {
            let count = cpu_count_source
                .as_ref()
                .and_then(|(key, i)| record.values(key).map(|v| v[*i]))
                .filter(|c| c.is_finite() && *c > 0.0)
                .or(fallback);
            let count = match count {
                Some(c) if c > 0.0 => c,
                _ => continue,
            };
            for (key, indices) in &targets {
                if let Some(values) = record.values_mut(key) {
                    for &i in indices {
                        if i < values.len() && !values[i].is_nan() {
                            values[i] /= count;
                        }
                    }
                }
            }
        }
    }
}
