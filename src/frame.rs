//! Command frame structure and checksum handling.
//!
//! Frame format (after SLIP decoding, before checksum validation):
//! ```text
//! [Command ID: 1 byte]
//! [Sequence: 1 byte]
//! [Status: 1 byte]  (0 = reserved in requests, device status in responses)
//! [Frame Length: 2 bytes LE]  (size of cmd+seq+status+len+payload, excludes checksum)
//! [Payload: variable]
//! [Checksum: 2 bytes LE]
//! ```
//!
//! The trailing checksum is the two's-complement of the byte sum of
//! everything before it — not a CRC polynomial, despite the field's
//! common nickname in deCONZ documentation.

use crate::commands::CommandId;
use crate::error::ProtocolError;

/// Minimum frame size: cmd(1) + seq(1) + status(1) + frame_len(2) + checksum(2) = 7
pub const MIN_FRAME_SIZE: usize = 7;

/// A decoded (or to-be-encoded) command frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub command_id: CommandId,
    pub sequence: u8,
    pub status: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Build a new outbound frame (status is always reserved/0 on requests).
    #[must_use]
    pub fn new(command_id: CommandId, sequence: u8, payload: Vec<u8>) -> Self {
        Self {
            command_id,
            sequence,
            status: 0,
            payload,
        }
    }

    /// Serialize the frame to bytes, ready for SLIP encoding.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let frame_len =
            u16::try_from(5 + self.payload.len()).expect("payload exceeds protocol maximum");

        let mut data = Vec::with_capacity(frame_len as usize + 2);
        data.push(self.command_id as u8);
        data.push(self.sequence);
        data.push(0x00);
        data.extend_from_slice(&frame_len.to_le_bytes());
        data.extend_from_slice(&self.payload);

        let checksum = Self::checksum(&data);
        data.extend_from_slice(&checksum.to_le_bytes());
        data
    }

    /// Parse a frame from de-SLIPped bytes, validating and stripping the
    /// trailing checksum first.
    pub fn deserialize(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < MIN_FRAME_SIZE {
            return Err(ProtocolError::FrameTooShort(data.len()));
        }

        let checksum_offset = data.len() - 2;
        let received = u16::from_le_bytes([data[checksum_offset], data[checksum_offset + 1]]);
        let computed = Self::checksum(&data[..checksum_offset]);

        if received != computed {
            return Err(ProtocolError::Checksum {
                expected: computed,
                actual: received,
            });
        }

        let command_id =
            CommandId::from_u8(data[0]).ok_or(ProtocolError::UnknownCommand(data[0]))?;
        let sequence = data[1];
        let status = data[2];

        let frame_len = u16::from_le_bytes([data[3], data[4]]) as usize;
        let expected_total = frame_len + 2;
        if expected_total != data.len() {
            return Err(ProtocolError::Decode(format!(
                "frame length mismatch: header says {frame_len} (+2 checksum = {expected_total}), actual {}",
                data.len()
            )));
        }

        let payload_start = 5;
        let payload = data[payload_start..checksum_offset].to_vec();

        Ok(Self {
            command_id,
            sequence,
            status,
            payload,
        })
    }

    /// `checksum(S) = two_bytes_le((-sum(S)) & 0xFFFF)`.
    #[must_use]
    pub fn checksum(data: &[u8]) -> u16 {
        let sum: u16 = data.iter().fold(0u16, |acc, &b| acc.wrapping_add(b as u16));
        (!sum).wrapping_add(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_calculation() {
        let data = vec![0x0D, 0x01, 0x00, 0x09, 0x00, 0x00, 0x00];
        let checksum = Frame::checksum(&data);
        let sum: u16 = data.iter().fold(0u16, |acc, &b| acc.wrapping_add(b as u16));
        let expected = (!sum).wrapping_add(1);
        assert_eq!(checksum, expected);
    }

    #[test]
    fn test_checksum_round_trip() {
        let frame = Frame::new(CommandId::DeviceState, 1, vec![0x00]);
        let bytes = frame.serialize();
        let decoded = Frame::deserialize(&bytes).unwrap();
        assert_eq!(decoded.command_id, CommandId::DeviceState);
        assert_eq!(decoded.sequence, 1);
        assert_eq!(decoded.payload, vec![0x00]);
    }

    #[test]
    fn test_frame_too_short() {
        let result = Frame::deserialize(&[0x01, 0x02]);
        assert!(matches!(result, Err(ProtocolError::FrameTooShort(_))));
    }

    #[test]
    fn test_checksum_mismatch() {
        let frame = Frame::new(CommandId::DeviceState, 1, vec![0x00]);
        let mut bytes = frame.serialize();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            Frame::deserialize(&bytes),
            Err(ProtocolError::Checksum { .. })
        ));
    }

    /// Scenario 1 from the protocol's testable-properties list: a
    /// DEVICE_STATE response.
    #[test]
    fn test_scenario_device_state_response() {
        let bytes = hex("0701000800aa000244ff");
        let frame = Frame::deserialize(&bytes).unwrap();
        assert_eq!(frame.command_id, CommandId::DeviceState);
        assert_eq!(frame.sequence, 1);
        assert_eq!(frame.status, 0);
    }

    /// Scenario 3: a READ_PARAMETER response for MAC_ADDR.
    #[test]
    fn test_scenario_read_parameter_mac_addr() {
        let bytes = hex("0a05001000090001e77f01ffff2e210023fc");
        let frame = Frame::deserialize(&bytes).unwrap();
        assert_eq!(frame.command_id, CommandId::ReadParameter);
        assert_eq!(frame.sequence, 5);
        assert_eq!(frame.status, 0);
    }

    pub(crate) fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }
}
