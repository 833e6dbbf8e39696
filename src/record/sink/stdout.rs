use std::io::Write;

use super::{Sink, SinkError};
use crate::record::Record;

/// One JSON line per record on stdout.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl Sink for StdoutSink {
    fn name(&self) -> &'static str {
        "stdout"
    }

    fn publish(&self, record: &Record) -> Result<(), SinkError> {
        let line = record.to_json()?;
        let mut out = std::io::stdout().lock();
        out.write_all(line.as_bytes())?;
        out.write_all(b"\n")?;
        Ok(())
    }
}
