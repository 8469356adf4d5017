// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Descriptors for the SD commands the driver issues.
//!
//! A `Command` says everything the controller needs to know about a command
//! except its argument, which is supplied per call. The table below is the
//! complete set used by card bring-up and block reads.

use static_assertions::const_assert_eq;

use super::regs::cmd;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CommandType {
    Normal,
    Suspend,
    FunctionSelect,
    Abort,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ResponseType {
    None,
    /// R2: CID or CSD.
    Long136,
    /// R1, R3, R6, R7.
    Short48,
    /// R1b: the card holds DAT0 low while busy.
    Short48Busy,
}

/// A data phase from card to host.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DataRead {
    pub blocks: u16,
    pub block_size: u16,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Command {
    pub index: u8,
    pub kind: CommandType,
    pub response: ResponseType,
    /// Controller checks the command index echoed in the response.
    pub check_index: bool,
    /// Controller checks the CRC7 of the response.
    pub check_crc: bool,
    pub data: Option<DataRead>,
}

impl Command {
    const fn new(index: u8, response: ResponseType) -> Self {
        Self {
            index,
            kind: CommandType::Normal,
            response,
            check_index: false,
            check_crc: false,
            data: None,
        }
    }

    const fn checked(mut self) -> Self {
        self.check_index = true;
        self.check_crc = true;
        self
    }

    const fn reading(mut self, blocks: u16, block_size: u16) -> Self {
        self.data = Some(DataRead { blocks, block_size });
        self
    }

    /// The value to write into the CMD register to issue this command.
    pub const fn encode(&self) -> u32 {
        let mut value = cmd::indx(self.index as u32);
        value |= cmd::cmd_type(match self.kind {
            CommandType::Normal => 0,
            CommandType::Suspend => 1,
            CommandType::FunctionSelect => 2,
            CommandType::Abort => 3,
        });
        value |= cmd::rsp_type(match self.response {
            ResponseType::None => 0,
            ResponseType::Long136 => 1,
            ResponseType::Short48 => 2,
            ResponseType::Short48Busy => 3,
        });
        if self.check_index {
            value |= cmd::CICE;
        }
        if self.check_crc {
            value |= cmd::CCCE;
        }
        if self.data.is_some() {
            value |= cmd::DP | cmd::DDIR;
        }
        value
    }
}

/// CMD0: reset all cards to idle.
pub const GO_IDLE_STATE: Command = Command::new(0, ResponseType::None);
/// CMD2: card identification.
pub const ALL_SEND_CID: Command = Command::new(2, ResponseType::Long136);
/// CMD3: ask the card for a relative address.
pub const SEND_RELATIVE_ADDR: Command = Command::new(3, ResponseType::Short48).checked();
/// ACMD6: bus width.
pub const SET_BUS_WIDTH: Command = Command::new(6, ResponseType::Short48Busy).checked();
/// CMD7: move the addressed card into the transfer state.
pub const SELECT_CARD: Command = Command::new(7, ResponseType::Short48Busy).checked();
/// CMD8: interface condition, echoing a check pattern.
pub const SEND_IF_COND: Command = Command::new(8, ResponseType::Short48).checked();
/// CMD9: card-specific data.
pub const SEND_CSD: Command = Command::new(9, ResponseType::Long136);
/// CMD17: one 512-byte block.
pub const READ_SINGLE_BLOCK: Command = Command::new(17, ResponseType::Short48)
    .checked()
    .reading(1, 512);
/// ACMD41: operating conditions; polled until the card is ready. The R3
/// response has neither an index nor a CRC.
pub const SD_SEND_OP_COND: Command = Command::new(41, ResponseType::Short48);
/// ACMD51: the 8-byte SD configuration register.
pub const SEND_SCR: Command = Command::new(51, ResponseType::Short48)
    .checked()
    .reading(1, 8);
/// CMD55: the next command is application specific.
pub const APP_CMD: Command = Command::new(55, ResponseType::Short48).checked();

// These match the values in TI's reference code for the part.
const_assert_eq!(GO_IDLE_STATE.encode(), 0x0000_0000);
const_assert_eq!(ALL_SEND_CID.encode(), 0x0201_0000);
const_assert_eq!(SELECT_CARD.encode(), 0x071B_0000);
const_assert_eq!(SEND_IF_COND.encode(), 0x081A_0000);
const_assert_eq!(READ_SINGLE_BLOCK.encode(), 0x113A_0010);
const_assert_eq!(SD_SEND_OP_COND.encode(), 0x2902_0000);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_commands_carry_their_geometry() {
        assert_eq!(
            READ_SINGLE_BLOCK.data,
            Some(DataRead {
                blocks: 1,
                block_size: 512
            })
        );
        assert_eq!(SEND_SCR.data.map(|d| d.block_size), Some(8));
        assert_eq!(APP_CMD.data, None);
    }

    #[test]
    fn non_normal_types_are_encoded() {
        let mut abort = GO_IDLE_STATE;
        abort.kind = CommandType::Abort;
        assert_eq!(abort.encode(), 0x00C0_0000);
    }
}
