/// Per-call parse configuration.
///
/// Nothing here defaults to the platform locale or zone: ambiguous local
/// timestamps are resolved against the offset the caller supplies, so the
/// same file parses identically on any machine.
use chrono::FixedOffset;

#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// UTC offset used to resolve zone-less local timestamps.
    pub timezone: FixedOffset,
    /// Scale process CPU percentages by the concurrently-observed CPU count
    /// (whole-data-set post-processing pass).
    pub scale_process_cpu: bool,
    /// Lenient time mode: a non-monotonic timestamp is repaired from the
    /// file's interval metadatum instead of rejecting the file.  Strict
    /// (the default) rejects.
    pub lenient_time: bool,
}

impl Default for ParseOptions {
    fn default() -> ParseOptions {
        ParseOptions {
            timezone: FixedOffset::east_opt(0).unwrap(),
            scale_process_cpu: false,
            lenient_time: false,
        }
    }
}

impl ParseOptions {
    pub fn new() -> ParseOptions {
        ParseOptions::default()
    }

    pub fn with_timezone(mut self, offset_seconds: i32) -> ParseOptions {
        if let Some(tz) = FixedOffset::east_opt(offset_seconds) {
            self.timezone = tz;
        }
        self
    }

    pub fn with_process_cpu_scaling(mut self, on: bool) -> ParseOptions {
        self.scale_process_cpu = on;
        self
    }

    pub fn with_lenient_time(mut self, on: bool) -> ParseOptions {
        self.lenient_time = on;
        self
    }
}
