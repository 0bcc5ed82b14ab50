//! Fragmentation reassembly.
//!
//! A pure helper used by the connection state machine so the accumulation
//! logic can be unit tested without any I/O. The connection record owns one
//! [`Reassembler`] per WebSocket connection; it starts empty and is cleared
//! after every complete message.

use crate::frame::OpCode;

/// Accumulates fragments of one in-progress WebSocket message.
#[derive(Debug, Default)]
pub struct Reassembler {
    state: Option<State>,
}

#[derive(Debug)]
struct State {
    opcode: OpCode,
    buffer: Vec<u8>,
}

/// Why a fragment couldn't be folded into the reassembler.
#[derive(Debug, PartialEq, Eq)]
pub enum ReassembleError {
    /// A CONTINUATION frame arrived with no message in progress.
    NoMessageInProgress,
    /// A TEXT/BINARY frame arrived while a message was already in progress
    /// (fragments must all be CONTINUATION after the first).
    UnexpectedNewMessage,
    /// Appending this fragment would exceed the configured message cap.
    TooLarge,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_progress(&self) -> bool {
        self.state.is_some()
    }

    /// Begins a new message with the first (non-final) fragment.
    pub fn begin(&mut self, opcode: OpCode, payload: &[u8]) -> Result<(), ReassembleError> {
        if self.state.is_some() {
            return Err(ReassembleError::UnexpectedNewMessage);
        }
        self.state = Some(State {
            opcode,
            buffer: payload.to_vec(),
        });
        Ok(())
    }

    /// Appends a CONTINUATION fragment, enforcing `max_message_size`.
    pub fn append(&mut self, payload: &[u8], max_message_size: usize) -> Result<(), ReassembleError> {
        let state = self.state.as_mut().ok_or(ReassembleError::NoMessageInProgress)?;
        if state.buffer.len() + payload.len() > max_message_size {
            return Err(ReassembleError::TooLarge);
        }
        state.buffer.extend_from_slice(payload);
        Ok(())
    }

    /// Completes the in-progress message, returning its opcode and full
    /// payload, and clears the reassembler for the next message.
    pub fn finish(&mut self) -> Result<(OpCode, Vec<u8>), ReassembleError> {
        let state = self.state.take().ok_or(ReassembleError::NoMessageInProgress)?;
        Ok((state.opcode, state.buffer))
    }

    /// Clears any in-progress message (used when the connection closes).
    pub fn reset(&mut self) {
        self.state = None;
    }
}
