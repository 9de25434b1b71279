//! Observable per-session activity: output tail, typed commands, selection.
//!
//! The registry feeds every output chunk and every input write through here
//! so that a context snapshot can be taken at any time without touching the
//! process.

use std::collections::VecDeque;

use crate::assistant::SessionObservation;

/// Bounded ring of the most recent output bytes.
#[derive(Debug, Clone)]
pub struct OutputTail {
    buf: VecDeque<u8>,
    capacity: usize,
}

impl OutputTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity.min(64 * 1024)),
            capacity,
        }
    }

    /// Append a chunk, evicting the oldest bytes past capacity.
    pub fn push(&mut self, data: &[u8]) {
        if self.capacity == 0 {
            return;
        }
        let data = if data.len() > self.capacity {
            &data[data.len() - self.capacity..]
        } else {
            data
        };
        let overflow = (self.buf.len() + data.len()).saturating_sub(self.capacity);
        self.buf.drain(..overflow);
        self.buf.extend(data);
    }

    /// The retained bytes, starting at a UTF-8 character boundary when
    /// eviction cut through a multi-byte character.
    pub fn to_vec(&self) -> Vec<u8> {
        let skip = self
            .buf
            .iter()
            .take(3)
            .take_while(|&&b| is_continuation(b))
            .count();
        self.buf.iter().skip(skip).copied().collect()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

fn is_continuation(byte: u8) -> bool {
    byte & 0b1100_0000 == 0b1000_0000
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputState {
    Normal,
    /// Saw ESC.
    Escape,
    /// Inside a CSI sequence (ESC [ ... final).
    Csi,
}

/// Recovers submitted command lines from raw keyboard input.
///
/// Printable bytes accumulate into the pending line, DEL/backspace erase the
/// previous character, Ctrl-C and Ctrl-U discard the line, and CR or LF
/// submits it. Escape sequences (arrow keys and the like) are skipped.
#[derive(Debug, Clone)]
pub struct CommandTracker {
    pending: Vec<u8>,
    history: VecDeque<String>,
    capacity: usize,
    state: InputState,
}

impl CommandTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: Vec::new(),
            history: VecDeque::new(),
            capacity,
            state: InputState::Normal,
        }
    }

    pub fn feed(&mut self, input: &[u8]) {
        for &byte in input {
            match self.state {
                InputState::Escape => {
                    self.state = if byte == b'[' {
                        InputState::Csi
                    } else {
                        InputState::Normal
                    };
                }
                InputState::Csi => {
                    if (0x40..=0x7e).contains(&byte) {
                        self.state = InputState::Normal;
                    }
                }
                InputState::Normal => self.feed_byte(byte),
            }
        }
    }

    fn feed_byte(&mut self, byte: u8) {
        match byte {
            0x1b => self.state = InputState::Escape,
            b'\r' | b'\n' => self.submit(),
            0x7f | 0x08 => self.erase_char(),
            0x03 | 0x15 => self.pending.clear(),
            b'\t' => self.pending.push(b' '),
            b if b < 0x20 => {}
            b => self.pending.push(b),
        }
    }

    /// Remove the last character, including all bytes of a multi-byte one.
    fn erase_char(&mut self) {
        while let Some(byte) = self.pending.pop() {
            if byte & 0xc0 != 0x80 {
                break;
            }
        }
    }

    fn submit(&mut self) {
        let line = String::from_utf8_lossy(&self.pending).trim().to_string();
        self.pending.clear();
        if line.is_empty() || self.capacity == 0 {
            return;
        }
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(line);
    }

    /// Submitted commands, most recent last.
    pub fn history(&self) -> Vec<String> {
        self.history.iter().cloned().collect()
    }
}

/// Everything the registry records about a session besides its lifecycle.
#[derive(Debug, Clone)]
pub struct SessionActivity {
    pub output: OutputTail,
    pub commands: CommandTracker,
    pub selection: Option<String>,
}

impl SessionActivity {
    pub fn new(output_capacity: usize, history_capacity: usize) -> Self {
        Self {
            output: OutputTail::new(output_capacity),
            commands: CommandTracker::new(history_capacity),
            selection: None,
        }
    }

    /// Raw material for the context assembler.
    pub fn observe(&self, working_directory: &str) -> SessionObservation {
        SessionObservation {
            recent_output: String::from_utf8_lossy(&self.output.to_vec()).into_owned(),
            working_directory: Some(working_directory.to_string()),
            recent_commands: self.commands.history(),
            selected_text: self.selection.clone(),
        }
    }
}
