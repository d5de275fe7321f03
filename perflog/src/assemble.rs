/// The record assembler.
///
/// Monitoring tools interleave many metric blocks per sampling interval: a
/// logical record is built from several physical lines that share a
/// timestamp token.  The assembler is a small state machine,
///
///   NoRecord -> Accumulating(timestamp, mark) -> emit -> NoRecord
///
/// with these transitions:
///
/// - a timestamp-marker line while accumulating closes the current record
///   (per-record post-processors run, then the record is appended to the
///   data set) before opening a new one
/// - a data line with the current mark appends; a data line carrying a
///   *different* mark is a misplaced record: logged, discarded, state
///   unchanged (this guards against interleaved or corrupt input)
/// - end of file force-closes any open record
///
/// Blocks may arrive in any order as long as they agree on the mark, and a
/// half-built record never leaks past the file boundary.
use crate::{DataRecord, DataSet, DataType, PostprocessorRegistry};

use perfutils::Timestamp;
use tracing::warn;
use ustr::Ustr;

pub struct RecordAssembler {
    current: Option<DataRecord>,
}

impl RecordAssembler {
    pub fn new() -> RecordAssembler {
        RecordAssembler { current: None }
    }

    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    pub fn mark(&self) -> Option<Ustr> {
        self.current.as_ref().map(|r| r.mark())
    }

    pub fn timestamp(&self) -> Option<Timestamp> {
        self.current.as_ref().map(|r| r.timestamp())
    }

    /// True if the open record already carries data for `key`.

    pub fn has(&self, key: &crate::TypeKey) -> bool {
        self.current.as_ref().is_some_and(|r| r.has(key))
    }

    /// Open a record for a new interval, sealing any record still open.

    pub fn open(
        &mut self,
        set: &mut DataSet,
        post: &PostprocessorRegistry,
        timestamp: Timestamp,
        mark: &str,
    ) {
        self.close(set, post);
        self.current = Some(DataRecord::new(timestamp, mark));
    }

    /// Append a value vector carried by a line with timestamp token `mark`.
    /// Returns false (and logs) for a misplaced mark; the caller drops the
    /// line and carries on.  Calling this with no open record is a caller
    /// bug guarded by `is_open`.

    pub fn append(&mut self, ty: &DataType, mark: &str, values: Vec<f64>) -> bool {
        let record = match self.current.as_mut() {
            Some(r) => r,
            None => {
                warn!("{}: data line at {mark} with no open record", ty.key());
                return false;
            }
        };
        if record.mark().as_str() != mark {
            warn!(
                "{}: misplaced record at {mark}, current interval is {}",
                ty.key(),
                record.mark()
            );
            return false;
        }
        record.set(ty, values);
        true
    }

    /// Move data already recorded in the open record from one type to
    /// another.  Used when a process split is detected after this sample's
    /// rows were recorded under the old generation's type.

    pub fn redirect(&mut self, from: &crate::TypeKey, to: &DataType) {
        if let Some(record) = self.current.as_mut() {
            if let Some(values) = record.remove(from) {
                record.set(to, values);
            }
        }
    }

    /// Seal the open record, if any: run the per-record post-processors and
    /// append it to the data set.  Also used at end of file.

    pub fn close(&mut self, set: &mut DataSet, post: &PostprocessorRegistry) {
        if let Some(mut record) = self.current.take() {
            post.run_record(set, &mut record);
            set.add_record(record);
        }
    }
}
