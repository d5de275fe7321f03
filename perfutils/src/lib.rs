// Utilities shared by the performance-log parsers: timestamps, line
// tokenization, and numeric field parsing.

mod dates;
mod fields;
mod numbers;

// Types and utilities for manipulating timestamps.

pub use dates::Timestamp;

// "A long long time ago".

pub use dates::epoch;

// The time right now.

pub use dates::now;

// A time that should not be in any sample record.

pub use dates::far_future;

// Parse a &str holding an RFC3339 stamp into a Timestamp.

pub use dates::parse_timestamp;

// Given year, month, day, hour, minute, second (all UTC), return a Timestamp.

pub use dates::timestamp_from_ymdhms;

// Resolve a zone-less local date-time against a caller-supplied UTC offset.

pub use dates::localize;

// Try a fixed list of date-time formats in order, resolving against an offset.

pub use dates::parse_local_fallback;

// Add whole seconds to a timestamp.

pub use dates::add_seconds;

// Field-splitting rules for the per-format tokenizers.

pub use fields::Delimiter;

// Split one physical line into fields under a delimiter rule.

pub use fields::tokenize;

// Parse a metric field under the engine's sentinel policy: Some(NaN) for
// "no data" tokens, Some(inf) for INF tokens, None for garbage.

pub use numbers::parse_metric;

// Parse a value with an optional binary unit suffix (1.5K, 3M, ...).

pub use numbers::parse_sized;
