/// Process tracking across the life of one parse.
///
/// A pid is not a globally unique identity: the OS recycles pids, and a
/// monitoring file covering hours of samples will routinely show the same
/// pid as two unrelated processes.  The tracker therefore keys process
/// identity on (pid, first-seen time) and splits history when a pid comes
/// back with a different name, or with a definitively different command
/// line supplied later.  The split closes the old process's end time at the
/// transition sample and opens a new process, whose data-type key carries a
/// generation suffix so both generations coexist in one registry.
///
/// Known limitation, accepted rather than guessed around: a recycled pid
/// with an identical name *and* identical command line is undetectable and
/// is treated as the same process.
use crate::TypeKey;

use perfutils::Timestamp;
use std::collections::HashMap;
use tracing::info;
use ustr::Ustr;

/// A tracked OS process or thread observed across samples.

#[derive(Debug, Clone)]
pub struct Process {
    pid: u32,
    start: Timestamp,
    end: Timestamp,
    name: Ustr,
    command_line: Option<String>,
    type_key: TypeKey,
}

impl Process {
    /// Direct construction, for parsers that learn a process's whole life
    /// span at once instead of observing it sample by sample.

    pub fn new(
        pid: u32,
        start: Timestamp,
        end: Timestamp,
        name: &str,
        command_line: Option<&str>,
        type_key: TypeKey,
    ) -> Process {
        Process {
            pid,
            start,
            end,
            name: Ustr::from(name),
            command_line: command_line.map(|c| c.to_string()),
            type_key,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn start(&self) -> Timestamp {
        self.start
    }

    /// End of the observed range; extended by each observation, closed for
    /// good when the pid is reused.

    pub fn end(&self) -> Timestamp {
        self.end
    }

    pub fn name(&self) -> Ustr {
        self.name
    }

    pub fn command_line(&self) -> Option<&str> {
        self.command_line.as_deref()
    }

    /// Key of the process-typed DataType that is a view over this process.

    pub fn type_key(&self) -> TypeKey {
        self.type_key
    }
}

/// Outcome of one observation.  `Split` carries both generations so the
/// caller can redirect data already recorded under the old key for the
/// current sample.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    New(usize),
    Existing(usize),
    Split { old: usize, new: usize },
}

impl Observation {
    /// The process the current sample belongs to.

    pub fn current(&self) -> usize {
        match *self {
            Observation::New(i) => i,
            Observation::Existing(i) => i,
            Observation::Split { new, .. } => new,
        }
    }
}

pub struct ProcessTracker {
    // The primary id of the process-typed data types, e.g. "TOP".
    type_id: Ustr,
    // pid -> index of the live generation in `processes`.
    live: HashMap<u32, usize>,
    // pid -> number of closed generations, for key suffixing.
    generations: HashMap<u32, u32>,
    processes: Vec<Process>,
}

impl ProcessTracker {
    pub fn new(type_id: &str) -> ProcessTracker {
        ProcessTracker {
            type_id: Ustr::from(type_id),
            live: HashMap::new(),
            generations: HashMap::new(),
            processes: Vec::new(),
        }
    }

    pub fn get(&self, index: usize) -> &Process {
        &self.processes[index]
    }

    /// Record that `pid` was seen at `time` under `name`, with the command
    /// line if the source line carried one.

    pub fn observe(
        &mut self,
        pid: u32,
        time: Timestamp,
        name: &str,
        command_line: Option<&str>,
    ) -> Observation {
        let name = Ustr::from(name);
        if let Some(&i) = self.live.get(&pid) {
            let same_name = self.processes[i].name == name;
            let same_cmdline = match (&self.processes[i].command_line, command_line) {
                // Not yet known on either side: compatible.
                (None, _) | (_, None) => true,
                (Some(old), Some(new)) => old == new,
            };
            if same_name && same_cmdline {
                let p = &mut self.processes[i];
                if p.command_line.is_none() {
                    if let Some(cmd) = command_line {
                        p.command_line = Some(cmd.to_string());
                    }
                }
                if time > p.end {
                    p.end = time;
                }
                return Observation::Existing(i);
            }
            // Pid reuse: close the old generation at this sample and open a
            // new one under a suffixed key.
            info!(
                "Pid {pid} reused: {} -> {name}, splitting process history",
                self.processes[i].name
            );
            self.processes[i].end = time;
            let gen = {
                let g = self.generations.entry(pid).or_insert(0);
                *g += 1;
                *g
            };
            let new = self.insert(pid, time, name, command_line, gen);
            return Observation::Split { old: i, new };
        }
        let gen = self.generations.get(&pid).copied().unwrap_or(0);
        Observation::New(self.insert(pid, time, name, command_line, gen))
    }

    fn insert(
        &mut self,
        pid: u32,
        time: Timestamp,
        name: Ustr,
        command_line: Option<&str>,
        gen: u32,
    ) -> usize {
        let sub = if gen == 0 {
            format!("{name} ({pid})")
        } else {
            format!("{name} ({pid}/{gen})")
        };
        let index = self.processes.len();
        self.processes.push(Process {
            pid,
            start: time,
            end: time,
            name,
            command_line: command_line.map(|c| c.to_string()),
            type_key: TypeKey::sub(self.type_id.as_str(), &sub),
        });
        self.live.insert(pid, index);
        index
    }

    /// Hand the accumulated processes over to the data set at end of parse.

    pub fn into_processes(self) -> Vec<Process> {
        self.processes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perfutils::timestamp_from_ymdhms;

    #[test]
    fn test_observe_extends_end() {
        let mut tracker = ProcessTracker::new("TOP");
        let t1 = timestamp_from_ymdhms(2013, 8, 15, 10, 0, 0);
        let t2 = timestamp_from_ymdhms(2013, 8, 15, 10, 0, 30);
        let a = tracker.observe(100, t1, "java", None);
        assert!(matches!(a, Observation::New(_)));
        let b = tracker.observe(100, t2, "java", None);
        assert!(matches!(b, Observation::Existing(_)));
        assert!(a.current() == b.current());
        let p = tracker.get(b.current());
        assert!(p.start() == t1 && p.end() == t2);
    }

    #[test]
    fn test_split_on_name_change() {
        let mut tracker = ProcessTracker::new("TOP");
        let t1 = timestamp_from_ymdhms(2013, 8, 15, 10, 0, 0);
        let t2 = timestamp_from_ymdhms(2013, 8, 15, 10, 5, 0);
        let a = tracker.observe(100, t1, "A", None);
        let b = tracker.observe(100, t2, "B", None);
        let (old, new) = match b {
            Observation::Split { old, new } => (old, new),
            _ => panic!("expected a split"),
        };
        assert!(old == a.current());
        let pa = tracker.get(old).clone();
        let pb = tracker.get(new);
        assert!(pa.end() == t2);
        assert!(pb.start() >= t2);
        assert!(pa.type_key() != pb.type_key());
        // Two distinct entities survive into the data set.
        assert!(tracker.into_processes().len() == 2);
    }

    #[test]
    fn test_split_on_late_command_line() {
        let mut tracker = ProcessTracker::new("TOP");
        let t1 = timestamp_from_ymdhms(2013, 8, 15, 10, 0, 0);
        let t2 = timestamp_from_ymdhms(2013, 8, 15, 10, 0, 30);
        let t3 = timestamp_from_ymdhms(2013, 8, 15, 10, 1, 0);
        // Command line learned late attaches to the existing process.
        tracker.observe(200, t1, "java", None);
        let b = tracker.observe(200, t2, "java", Some("java -jar app.jar"));
        assert!(matches!(b, Observation::Existing(_)));
        assert!(tracker.get(b.current()).command_line() == Some("java -jar app.jar"));
        // A definitively different command line later forces a split.
        let c = tracker.observe(200, t3, "java", Some("java -jar other.jar"));
        assert!(matches!(c, Observation::Split { .. }));
    }

    #[test]
    fn test_generation_key_suffix() {
        let mut tracker = ProcessTracker::new("TOP");
        let t1 = timestamp_from_ymdhms(2013, 8, 15, 10, 0, 0);
        let t2 = timestamp_from_ymdhms(2013, 8, 15, 10, 5, 0);
        tracker.observe(100, t1, "A", None);
        let b = tracker.observe(100, t2, "B", None);
        let key = tracker.get(b.current()).type_key();
        assert!(key == TypeKey::sub("TOP", "B (100/1)"));
    }
}
