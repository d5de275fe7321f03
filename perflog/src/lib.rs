/// Ingestion and normalization of performance-monitoring logs.
///
/// Eight line-oriented formats - NMON, iostat (Linux and AIX), Windows
/// Perfmon CSV, VMware ESXTop batch CSV, FIO sample logs, JMeter result
/// CSV, HATJ result CSV, and `zpool iostat -v` - are parsed into one
/// uniform in-memory model: a `DataSet` holding typed metric groups
/// (`DataType`), time-ordered samples (`DataRecord`), and tracked OS
/// processes (`Process`).
///
/// Each format gets one `parse_*` entry point taking a readable stream and
/// a `ParseOptions`.  A parse either returns a fully populated data set or
/// an error; it never returns partial data.  Recoverable input problems
/// (bad numeric fields, short rows, out-of-sync lines) cost only the
/// offending row and are reported through `tracing`.
///
/// Everything is synchronous and single-threaded; all mutable parsing
/// state lives in a per-call context, so the entry points can be called
/// freely from anywhere, sequentially or from different threads on
/// different inputs.

mod assemble;
mod data;
mod esxtop;
mod fio;
mod hatj;
mod iostat;
mod jmeter;
mod nmon;
mod options;
mod pdh;
mod pending;
mod perfmon;
mod postprocess;
mod process;
mod transform;
mod zpool;

// The root aggregate: hostname, metadata, types, records, processes.

pub use data::DataSet;

// A named group of related metric fields.

pub use data::DataType;

// All metric values sampled at one timestamp.

pub use data::DataRecord;

// Identity of a metric group: plain id, or id plus per-instance sub-id.

pub use data::TypeKey;

// Registry errors, concrete so callers can discriminate them.

pub use data::TypeError;

// A tracked OS process or thread observed across samples.

pub use process::Process;

// Pid-keyed process tracking with reuse detection.

pub use process::{Observation, ProcessTracker};

// Per-call parse configuration: time zone, cpu scaling, lenient time.

pub use options::ParseOptions;

// Lazy first-write-wins type construction and the skip-index table.

pub use pending::{SkipIndex, TypeBuilder};

pub(crate) use pending::generic_fields;

// The record assembler state machine.

pub use assemble::RecordAssembler;

// Format-specific value transforms, first applicable wins.

pub use transform::{
    CpuBusyTransform, DiskTotalTransform, MemoryUsedTransform, Transform, TransformRegistry,
    ZPoolUnitsTransform,
};

// Per-record and whole-data-set derivation passes.

pub use postprocess::{
    DataSetPostprocessor, NetColumnTotal, PostprocessorRegistry, ProcessCpuScale,
    RecordPostprocessor, SubTypeTotal,
};

// Parse NMON output (AIX and Linux).

pub use nmon::parse_nmon;

// Parse iostat output (Linux and AIX).

pub use iostat::parse_iostat;

// Parse Windows Perfmon CSV captures.

pub use perfmon::parse_perfmon;

// Parse VMware ESXTop batch captures.

pub use esxtop::parse_esxtop;

// Parse FIO sample logs.

pub use fio::parse_fio;

// Parse JMeter aggregate CSV result files.

pub use jmeter::parse_jmeter;

// Parse HATJ load-test CSV result files.

pub use hatj::parse_hatj;

// Parse `zpool iostat -v` output.

pub use zpool::parse_zpool;
