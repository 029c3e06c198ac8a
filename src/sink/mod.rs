//! Push delivery: sink table and the background poller draining into it.
//!
//! Sinks receive newline-delimited messages. The owner of a sink must keep
//! consuming it; a writer that blocks stalls the poller for every client.

mod poller;
mod table;

pub use poller::{DEFAULT_MAX_BATCH, DEFAULT_POLL_INTERVAL, PollerConfig};
pub use table::{SinkTable, SinkWriter};

pub(crate) use poller::Poller;

use std::io::{PipeReader, PipeWriter};

/// Create an anonymous pipe whose writer end can be registered as a sink.
///
/// Dropping the writer (by unregistering the sink) makes the reader see EOF.
pub fn create_pipe() -> std::io::Result<(PipeReader, PipeWriter)> {
    std::io::pipe()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn pipe_reader_sees_eof_after_writer_drop() {
        let (mut reader, mut writer) = create_pipe().unwrap();
        writer.write_all(b"hello\n").unwrap();
        drop(writer);

        let mut text = String::new();
        reader.read_to_string(&mut text).unwrap();
        assert_eq!(text, "hello\n");
    }
}
