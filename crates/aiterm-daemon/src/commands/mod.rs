pub mod ask;
pub mod models;
pub mod shell;

use aiterm_core::QueryStream;
use std::io::{self, Write};

/// Copy a streamed answer to stdout as it arrives.
pub(crate) fn print_stream(stream: QueryStream) -> anyhow::Result<()> {
    let mut stdout = io::stdout();
    for fragment in stream {
        stdout.write_all(fragment?.as_bytes())?;
        stdout.flush()?;
    }
    writeln!(stdout)?;
    Ok(())
}
