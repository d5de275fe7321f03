/// Format-specific value transforms, applied to a raw field vector before it
/// is attached to a record.
///
/// A transform is a capability: it declares which type keys it applies to
/// and is tried against a fixed priority order; the first applicable
/// transform wins and no chaining happens.  That mirrors the derivations
/// themselves: CPU-busy derivation and disk-total derivation never touch
/// the same type, and keeping the dispatch first-match keeps the arity
/// bookkeeping simple (each transform fully owns its type's extra columns).
///
/// A transform may also override type construction (`build_type`) when the
/// on-disk field list must be extended, reduced, or renamed; `apply` then
/// brings each raw value vector to the declared arity.  `apply` receives a
/// vector whose length matches the *on-disk* (post-skip) column list and
/// must leave it at the type's declared arity.
use crate::{DataType, TypeKey};

use ustr::Ustr;

pub trait Transform {
    fn applies_to(&self, key: &TypeKey) -> bool;

    /// Build the DataType for `key` from the on-disk field list.  The
    /// default keeps the fields as-is.

    fn build_type(&self, key: TypeKey, name: &str, fields: Vec<Ustr>) -> DataType {
        DataType::new(key, name, fields)
    }

    /// Transform one raw value vector in place.

    fn apply(&self, ty: &DataType, values: &mut Vec<f64>);
}

/// Ordered transform registry; first applicable transform wins.

pub struct TransformRegistry {
    transforms: Vec<Box<dyn Transform>>,
}

impl TransformRegistry {
    pub fn new() -> TransformRegistry {
        TransformRegistry { transforms: vec![] }
    }

    /// The standard chain, in priority order.

    pub fn standard() -> TransformRegistry {
        let mut r = TransformRegistry::new();
        r.register(Box::new(CpuBusyTransform));
        r.register(Box::new(DiskTotalTransform));
        r.register(Box::new(MemoryUsedTransform));
        r.register(Box::new(ZPoolUnitsTransform));
        r
    }

    pub fn register(&mut self, t: Box<dyn Transform>) {
        self.transforms.push(t);
    }

    pub fn find(&self, key: &TypeKey) -> Option<&dyn Transform> {
        self.transforms
            .iter()
            .find(|t| t.applies_to(key))
            .map(|t| t.as_ref())
    }

    /// Build a type through the applicable transform, if any.

    pub fn build_type(&self, key: TypeKey, name: &str, fields: Vec<Ustr>) -> DataType {
        match self.find(&key) {
            Some(t) => t.build_type(key, name, fields),
            None => DataType::new(key, name, fields),
        }
    }

    /// Apply the applicable transform, if any, to a raw value vector.

    pub fn apply(&self, ty: &DataType, values: &mut Vec<f64>) {
        if let Some(t) = self.find(&ty.key()) {
            t.apply(ty, values);
        }
    }
}

// NMON's CPU groups carry User%/Sys%/Wait%/Idle% but charts want a single
// busy number; derive CPU% = User% + Sys% as an extra trailing column.
// Applies to CPU_ALL and the per-core CPU01, CPU02, ... groups.

pub struct CpuBusyTransform;

impl CpuBusyTransform {
    fn is_cpu_id(id: &str) -> bool {
        id == "CPU_ALL"
            || (id.len() > 3
                && id.starts_with("CPU")
                && id[3..].bytes().all(|b| b.is_ascii_digit()))
    }
}

impl Transform for CpuBusyTransform {
    fn applies_to(&self, key: &TypeKey) -> bool {
        CpuBusyTransform::is_cpu_id(key.id().as_str())
    }

    fn build_type(&self, key: TypeKey, name: &str, mut fields: Vec<Ustr>) -> DataType {
        fields.push(Ustr::from("CPU%"));
        DataType::new(key, name, fields)
    }

    fn apply(&self, ty: &DataType, values: &mut Vec<f64>) {
        let busy = match (ty.field_index("User%"), ty.field_index("Sys%")) {
            (Some(u), Some(s)) if u < values.len() && s < values.len() => values[u] + values[s],
            _ => f64::NAN,
        };
        values.push(busy);
    }
}

// Disk groups have one column per disk; append a Total column so per-host
// summaries don't have to know the disk list.  NaN columns (disks with no
// data this interval) are left out of the sum.

pub struct DiskTotalTransform;

const DISK_IDS: &[&str] = &["DISKREAD", "DISKWRITE", "DISKBUSY", "DISKXFER", "DISKBSIZE"];

impl Transform for DiskTotalTransform {
    fn applies_to(&self, key: &TypeKey) -> bool {
        DISK_IDS.contains(&key.id().as_str())
    }

    fn build_type(&self, key: TypeKey, name: &str, mut fields: Vec<Ustr>) -> DataType {
        fields.push(Ustr::from("Total"));
        DataType::new(key, name, fields)
    }

    fn apply(&self, _ty: &DataType, values: &mut Vec<f64>) {
        let total = values.iter().filter(|v| !v.is_nan()).sum();
        values.push(total);
    }
}

// Memory composite: derive the memory actually in use from total and free.

pub struct MemoryUsedTransform;

impl Transform for MemoryUsedTransform {
    fn applies_to(&self, key: &TypeKey) -> bool {
        key.id().as_str() == "MEM"
    }

    fn build_type(&self, key: TypeKey, name: &str, mut fields: Vec<Ustr>) -> DataType {
        fields.push(Ustr::from("memused"));
        DataType::new(key, name, fields)
    }

    fn apply(&self, ty: &DataType, values: &mut Vec<f64>) {
        let used = match (ty.field_index("memtotal"), ty.field_index("memfree")) {
            (Some(t), Some(f)) if t < values.len() && f < values.len() => values[t] - values[f],
            _ => f64::NAN,
        };
        values.push(used);
    }
}

// ZPool values arrive with binary unit suffixes and are parsed to plain
// bytes; rename the fields so readers see the real unit.  Values themselves
// need no further work.

pub struct ZPoolUnitsTransform;

impl Transform for ZPoolUnitsTransform {
    fn applies_to(&self, key: &TypeKey) -> bool {
        key.id().as_str() == "zpool"
    }

    fn build_type(&self, key: TypeKey, name: &str, fields: Vec<Ustr>) -> DataType {
        let renamed = fields
            .into_iter()
            .map(|f| match f.as_str() {
                "alloc" => Ustr::from("alloc (bytes)"),
                "free" => Ustr::from("free (bytes)"),
                "read ops" => Ustr::from("read (ops/s)"),
                "write ops" => Ustr::from("write (ops/s)"),
                "read bw" => Ustr::from("read (bytes/s)"),
                "write bw" => Ustr::from("write (bytes/s)"),
                _ => f,
            })
            .collect();
        DataType::new(key, name, renamed)
    }

    fn apply(&self, _ty: &DataType, _values: &mut Vec<f64>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(names: &[&str]) -> Vec<Ustr> {
        names.iter().map(|n| Ustr::from(n)).collect()
    }

    #[test]
    fn test_first_match_wins() {
        let r = TransformRegistry::standard();
        assert!(r.find(&TypeKey::plain("CPU_ALL")).is_some());
        assert!(r.find(&TypeKey::plain("CPU01")).is_some());
        assert!(r.find(&TypeKey::plain("CPUALL")).is_none());
        assert!(r.find(&TypeKey::plain("NET")).is_none());
        assert!(r.find(&TypeKey::sub("zpool", "tank")).is_some());
    }

    #[test]
    fn test_cpu_busy() {
        let r = TransformRegistry::standard();
        let ty = r.build_type(
            TypeKey::plain("CPU_ALL"),
            "CPU Total",
            fields(&["User%", "Sys%", "Wait%"]),
        );
        assert!(ty.field_index("CPU%") == Some(3));
        let mut values = vec![10.0, 5.0, 3.0];
        r.apply(&ty, &mut values);
        assert!(values == [10.0, 5.0, 3.0, 15.0]);
    }

    #[test]
    fn test_disk_total_skips_nan() {
        let r = TransformRegistry::standard();
        let ty = r.build_type(
            TypeKey::plain("DISKREAD"),
            "Disk Read KB/s",
            fields(&["sda", "sdb"]),
        );
        let mut values = vec![100.0, f64::NAN];
        r.apply(&ty, &mut values);
        assert!(values[2] == 100.0);
    }

    #[test]
    fn test_memory_used() {
        let r = TransformRegistry::standard();
        let ty = r.build_type(
            TypeKey::plain("MEM"),
            "Memory MB",
            fields(&["memtotal", "memfree"]),
        );
        let mut values = vec![16000.0, 4000.0];
        r.apply(&ty, &mut values);
        assert!(values == [16000.0, 4000.0, 12000.0]);
    }

    #[test]
    fn test_zpool_rename() {
        let r = TransformRegistry::standard();
        let ty = r.build_type(
            TypeKey::sub("zpool", "tank"),
            "tank",
            fields(&["alloc", "free", "read ops", "write ops", "read bw", "write bw"]),
        );
        assert!(ty.field_index("read (bytes/s)") == Some(4));
        assert!(ty.field_index("read bw").is_none());
    }
}
