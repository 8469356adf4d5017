// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Receive-only XMODEM-CRC / XMODEM-1K.
//!
//! The sender drives the transfer; we only ever react to it. Each call to
//! [`Receiver::receive_next`] is one protocol round: we send a control byte
//! (`C` to start, ACK to request the next packet), then read packets until
//! one checks out, the sender ends or cancels the transfer, or we run out of
//! attempts.
//!
//! On the wire a packet is
//!
//! ```text
//! [SOH|STX] [seq] [0xFF - seq] [128|1024 payload bytes] [CRC16, big endian]
//! ```
//!
//! and the end of a transfer is a lone EOT, which we acknowledge.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::crc::crc16;
use crate::serial::Serial;

/// Request to start a transfer in CRC mode.
pub const START: u8 = b'C';
pub const ACK: u8 = 0x06;
pub const NAK: u8 = 0x15;
pub const CAN: u8 = 0x18;

/// Largest payload we can receive.
pub const MAX_PAYLOAD: usize = 1024;

/// Leading byte of everything the sender transmits.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u8)]
enum Marker {
    /// 128-byte packet.
    Soh = 0x01,
    /// 1024-byte packet.
    Stx = 0x02,
    /// End of transfer.
    Eot = 0x04,
    /// Sender gave up.
    Can = 0x18,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum State {
    Uninitialized,
    /// Initialized, no transfer in flight. The next round asks the sender to
    /// start.
    Waiting,
    /// At least one packet accepted. The next round acknowledges it.
    Receiving,
}

/// Why a single receive attempt was rejected. These are retried.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Fault {
    #[error("timed out waiting for the sender")]
    Timeout,
    #[error("packet ended early")]
    Truncated,
    #[error("unexpected marker byte {0:#04x}")]
    UnexpectedMarker(u8),
    #[error("got packet {got} ({complement:#04x}), expected {expected}")]
    Sequence { expected: u8, got: u8, complement: u8 },
    #[error("checksum {received:#06x} does not match payload ({computed:#06x})")]
    Crc { received: u16, computed: u16 },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("serial channel is not configured")]
    NotConfigured,
    #[error("receiver is not initialized")]
    Uninitialized,
    #[error("transfer cancelled by sender")]
    Cancelled,
    #[error("out of retries ({last})")]
    RetriesExhausted { last: Fault },
    #[error("no room for a payload")]
    NoBuffer,
}

/// What a successful attempt turned up.
enum Packet {
    Data(usize),
    End,
    Cancel,
}

/// One transfer session on one serial channel.
pub struct Receiver<S> {
    channel: Option<S>,
    state: State,
    retries: u32,
    sequence: u8,
    buffer: [u8; MAX_PAYLOAD],
}

impl<S> Default for Receiver<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Receiver<S> {
    /// Creates an uninitialized receiver. Nothing can be received until
    /// [`init`](Self::init) hands it a channel.
    pub const fn new() -> Self {
        Self {
            channel: None,
            state: State::Uninitialized,
            retries: 0,
            sequence: 1,
            buffer: [0; MAX_PAYLOAD],
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Sequence number the next data packet must carry.
    pub fn expected_sequence(&self) -> u8 {
        self.sequence
    }

    /// Gives the channel back, leaving the receiver uninitialized.
    pub fn release(&mut self) -> Option<S> {
        self.state = State::Uninitialized;
        self.channel.take()
    }
}

impl<S: Serial> Receiver<S> {
    /// Starts a session on `channel`. `retries` is the number of receive
    /// attempts each call to [`receive_next`](Self::receive_next) may make.
    pub fn init(&mut self, channel: S, retries: u32) -> Result<(), Error> {
        if !channel.is_configured() {
            return Err(Error::NotConfigured);
        }
        self.channel = Some(channel);
        self.retries = retries;
        self.sequence = 1;
        self.state = State::Waiting;
        Ok(())
    }

    /// Runs one protocol round.
    ///
    /// Returns the number of payload bytes copied into `out` (at most
    /// `out.len()`; anything beyond that is dropped), or zero when the sender
    /// has ended the transfer. Any error leaves the session back in
    /// `Waiting`, having told the sender to cancel if a transfer was in
    /// flight.
    ///
    /// An empty `out` is refused with [`Error::NoBuffer`] before anything
    /// goes on the wire, since zero is how the end of a transfer reads.
    pub fn receive_next(&mut self, out: &mut [u8]) -> Result<usize, Error> {
        let command = match self.state {
            State::Uninitialized => return Err(Error::Uninitialized),
            State::Waiting => START,
            State::Receiving => ACK,
        };
        let Some(channel) = self.channel.as_mut() else {
            return Err(Error::Uninitialized);
        };
        if out.is_empty() {
            return Err(Error::NoBuffer);
        }

        self.buffer.fill(0);
        channel.write(&[command]);

        let mut last = Fault::Timeout;
        for attempt in 1..=self.retries {
            match read_packet(channel, &mut self.buffer, self.sequence) {
                Ok(Packet::Data(len)) => {
                    let n = out.len().min(len);
                    out[..n].copy_from_slice(&self.buffer[..n]);
                    self.sequence = self.sequence.wrapping_add(1);
                    self.state = State::Receiving;
                    return Ok(n);
                }
                Ok(Packet::End) => {
                    channel.write(&[ACK]);
                    self.sequence = 1;
                    self.state = State::Waiting;
                    return Ok(0);
                }
                Ok(Packet::Cancel) => {
                    log::trace!("sender cancelled");
                    self.cancel();
                    return Err(Error::Cancelled);
                }
                Err(fault) => {
                    log::trace!("attempt {attempt}: {fault}");
                    last = fault;
                    // A silent sender gets no NAK; there is nothing to resend.
                    if attempt < self.retries && fault != Fault::Timeout {
                        self.buffer.fill(0);
                        channel.write(&[NAK]);
                    }
                }
            }
        }

        self.cancel();
        Err(Error::RetriesExhausted { last })
    }

    /// Cancels the session. The sender is told to stop; the receiver goes
    /// back to waiting for a new transfer.
    pub fn abort(&mut self) -> Result<(), Error> {
        if self.state == State::Uninitialized {
            return Err(Error::Uninitialized);
        }
        if let Some(channel) = self.channel.as_mut() {
            channel.write(&[CAN, CAN]);
        }
        self.sequence = 1;
        self.state = State::Waiting;
        Ok(())
    }

    /// Error-path teardown: only a transfer in flight needs cancelling.
    fn cancel(&mut self) {
        if self.state == State::Receiving {
            if let Some(channel) = self.channel.as_mut() {
                channel.write(&[CAN, CAN]);
            }
        }
        self.sequence = 1;
        self.state = State::Waiting;
    }
}

/// Reads one whole packet off the wire and validates it.
///
/// The packet is always read to its end before it is judged, so that a
/// rejected packet doesn't leave payload bytes behind to be mistaken for the
/// next marker.
fn read_packet<S: Serial>(
    channel: &mut S,
    buffer: &mut [u8; MAX_PAYLOAD],
    expected: u8,
) -> Result<Packet, Fault> {
    let mut marker = [0u8];
    if !read_exact(channel, &mut marker) {
        return Err(Fault::Timeout);
    }
    let len = match Marker::from_u8(marker[0]) {
        Some(Marker::Soh) => 128,
        Some(Marker::Stx) => 1024,
        Some(Marker::Eot) => return Ok(Packet::End),
        Some(Marker::Can) => return Ok(Packet::Cancel),
        None => return Err(Fault::UnexpectedMarker(marker[0])),
    };

    let mut sequence = [0u8; 2];
    let mut crc = [0u8; 2];
    let complete = read_exact(channel, &mut sequence)
        && read_exact(channel, &mut buffer[..len])
        && read_exact(channel, &mut crc);
    if !complete {
        return Err(Fault::Truncated);
    }

    let [got, complement] = sequence;
    if got != expected || complement != 0xFF - expected {
        return Err(Fault::Sequence {
            expected,
            got,
            complement,
        });
    }

    let received = u16::from_be_bytes(crc);
    let computed = crc16(&buffer[..len]);
    if received != computed {
        return Err(Fault::Crc { received, computed });
    }

    Ok(Packet::Data(len))
}

/// Fills `buf` from the channel, giving up on the first read timeout.
fn read_exact<S: Serial>(channel: &mut S, buf: &mut [u8]) -> bool {
    let mut filled = 0;
    while filled < buf.len() {
        let n = channel.read(&mut buf[filled..]);
        if n == 0 {
            return false;
        }
        filled += n;
    }
    true
}
