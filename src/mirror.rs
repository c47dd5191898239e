use std::fmt;
use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};

use crate::encoder::EncodedRecord;

/// Best-effort local copy of every encoded record.
///
/// Writes the same bytes that are queued for delivery. Write errors are
/// reported on stderr and otherwise swallowed: the mirror must not
/// influence delivery or the thread that logged.
pub struct DebugMirror {
    out: Mutex<Box<dyn Write + Send>>,
}

impl DebugMirror {
    pub fn new<W: Write + Send + 'static>(out: W) -> Self {
        Self {
            out: Mutex::new(Box::new(out)),
        }
    }

    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }

    /// Write one record. Returns `false` if the write failed; the
    /// failure has already been reported on stderr.
    pub fn write(&self, record: &EncodedRecord) -> bool {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        let written = out.write_all(record.as_bytes());
        let result = written.and_then(|()| out.flush());
        drop(out);

        match result {
            Ok(()) => true,
            Err(e) => {
                eprintln!("tracing-hdx-sink: debug mirror write failed: {}", e);
                false
            }
        }
    }
}

impl fmt::Debug for DebugMirror {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugMirror").finish_non_exhaustive()
    }
}
