//! Wire-level value types: status codes, device state, addresses, and
//! the APS data indication/request payloads built on top of them.

use crate::error::ProtocolError;
use crate::reader::PayloadReader;

/// Device status codes returned in a response frame's status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Success = 0x00,
    Failure = 0x01,
    Busy = 0x02,
    Timeout = 0x03,
    Unsupported = 0x04,
    Error = 0x05,
    NoNetwork = 0x06,
    InvalidValue = 0x07,
}

impl Status {
    /// Unknown status bytes decode to `Error` rather than failing —
    /// a device reporting a status this driver doesn't know about is
    /// still reporting *some* failure, not grounds to drop the frame.
    #[must_use]
    pub fn from_byte(value: u8) -> Self {
        match value {
            0x00 => Status::Success,
            0x01 => Status::Failure,
            0x02 => Status::Busy,
            0x03 => Status::Timeout,
            0x04 => Status::Unsupported,
            0x05 => Status::Error,
            0x06 => Status::NoNetwork,
            0x07 => Status::InvalidValue,
            _ => Status::Error,
        }
    }
}

/// Network join state, the low two bits of a device-state word. Also the
/// outbound `CHANGE_NETWORK_STATE` request code (spec: "carries one of
/// the four network-state codes").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NetworkState {
    Offline = 0,
    Joining = 1,
    Connected = 2,
    Leaving = 3,
}

impl NetworkState {
    #[must_use]
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => NetworkState::Offline,
            1 => NetworkState::Joining,
            2 => NetworkState::Connected,
            _ => NetworkState::Leaving,
        }
    }
}

/// The DEVICE_STATE / DEVICE_STATE_CHANGED status word: a network state
/// plus four orthogonal flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceState {
    pub network_state: NetworkState,
    pub aps_data_confirm: bool,
    pub aps_data_indication: bool,
    pub configuration_changed: bool,
    pub aps_request_free_slots: bool,
}

impl DeviceState {
    #[must_use]
    pub fn from_byte(byte: u8) -> Self {
        Self {
            network_state: NetworkState::from_bits(byte),
            aps_data_confirm: byte & 0x04 != 0,
            aps_data_indication: byte & 0x08 != 0,
            configuration_changed: byte & 0x10 != 0,
            aps_request_free_slots: byte & 0x20 != 0,
        }
    }
}

/// Raw wire address mode, as it appears in an APS frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AddressMode {
    Group = 0x01,
    Nwk = 0x02,
    Ieee = 0x03,
    /// Some firmware emits a combined short+extended destination; the
    /// short address is authoritative at the public `Address` boundary.
    NwkAndIeee = 0x04,
}

impl AddressMode {
    pub fn try_from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x01 => Ok(AddressMode::Group),
            0x02 => Ok(AddressMode::Nwk),
            0x03 => Ok(AddressMode::Ieee),
            0x04 => Ok(AddressMode::NwkAndIeee),
            other => Err(ProtocolError::Decode(format!(
                "unknown address mode {other:#04X}"
            ))),
        }
    }
}

/// A Zigbee address: mode, address value, and endpoint, tagged by mode
/// so a 16-bit NWK/group address can never be confused with a 64-bit
/// IEEE address at the type level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Address {
    Group(u16, u8),
    Nwk(u16, u8),
    Ieee(u64, u8),
}

impl Address {
    #[must_use]
    pub fn endpoint(&self) -> u8 {
        match self {
            Address::Group(_, ep) | Address::Nwk(_, ep) | Address::Ieee(_, ep) => *ep,
        }
    }

    fn parse(reader: &mut PayloadReader, allow_group: bool) -> Result<Self, ProtocolError> {
        let mode = AddressMode::try_from_u8(reader.pop_u8()?)?;
        if mode == AddressMode::Group && !allow_group {
            return Err(ProtocolError::Decode(
                "Group address mode not valid in source position".into(),
            ));
        }
        match mode {
            AddressMode::Group => {
                let addr = reader.pop_u16_le()?;
                let endpoint = 0;
                Ok(Address::Group(addr, endpoint))
            }
            AddressMode::Nwk => {
                let addr = reader.pop_u16_le()?;
                Ok(Address::Nwk(addr, 0))
            }
            AddressMode::Ieee => {
                let addr = reader.pop_u64_le()?;
                Ok(Address::Ieee(addr, 0))
            }
            AddressMode::NwkAndIeee => {
                let short = reader.pop_u16_le()?;
                let _ieee = reader.pop_u64_le()?;
                Ok(Address::Nwk(short, 0))
            }
        }
    }

    fn with_endpoint(self, endpoint: u8) -> Self {
        match self {
            Address::Group(a, _) => Address::Group(a, endpoint),
            Address::Nwk(a, _) => Address::Nwk(a, endpoint),
            Address::Ieee(a, _) => Address::Ieee(a, endpoint),
        }
    }
}

/// A decoded inbound APS data indication (command `0x17`).
#[derive(Debug, Clone)]
pub struct Message {
    pub src: Address,
    pub dest: Address,
    pub profile_id: u16,
    pub cluster_id: u16,
    pub data: Vec<u8>,
    pub lqi: u8,
    pub rssi: i8,
    pub request_id: Option<u8>,
}

impl Message {
    /// Parse the payload of an `APS_DATA_INDICATION` response (after the
    /// common 5-byte frame header has already been stripped).
    ///
    /// Returns the message and the embedded `device_state` byte, which
    /// the caller must feed back into the device-state machine.
    pub fn parse_indication(payload: &[u8]) -> Result<(Self, DeviceState), ProtocolError> {
        let mut reader = PayloadReader::new(payload);

        let _payload_length = reader.pop_u16_le()?;
        let device_state = DeviceState::from_byte(reader.pop_u8()?);

        let dest = Address::parse(&mut reader, true)?;
        let dest_endpoint = reader.pop_u8()?;
        let dest = dest.with_endpoint(dest_endpoint);

        let src = Address::parse(&mut reader, false)?;
        let src_endpoint = reader.pop_u8()?;
        let src = src.with_endpoint(src_endpoint);

        let profile_id = reader.pop_u16_le()?;
        let cluster_id = reader.pop_u16_le()?;

        let asdu_length = reader.pop_u16_le()? as usize;
        let data = reader.pop_raw(asdu_length)?;

        let _reserved = reader.pop_raw(2)?;
        let lqi = reader.pop_u8()?;
        let _reserved = reader.pop_raw(4)?;
        let rssi = reader.pop_i8()?;

        Ok((
            Message {
                src,
                dest,
                profile_id,
                cluster_id,
                data,
                lqi,
                rssi,
                request_id: None,
            },
            device_state,
        ))
    }

    /// Serialize an outbound `APS_DATA_REQUEST` payload (command `0x12`,
    /// after the common 5-byte frame header). Only `Address::Nwk`
    /// destinations are supported by the core (§4.8); `tx_options` is the
    /// byte in wire position 4, fixed at `0x02` for NWK destinations.
    pub fn serialize_request(
        &self,
        request_id: u8,
        tx_options: u8,
    ) -> Result<Vec<u8>, ProtocolError> {
        let Address::Nwk(dest_addr, dest_endpoint) = self.dest else {
            return Err(ProtocolError::Decode(
                "APS data request destination must be a NWK address".into(),
            ));
        };
        let src_endpoint = self.src.endpoint();

        let mut inner = Vec::new();
        inner.push(request_id);
        inner.push(0x00); // flags
        inner.push(tx_options);
        inner.extend_from_slice(&dest_addr.to_le_bytes());
        inner.push(dest_endpoint);
        inner.extend_from_slice(&self.profile_id.to_le_bytes());
        inner.extend_from_slice(&self.cluster_id.to_le_bytes());
        inner.push(src_endpoint);
        inner.extend_from_slice(&(self.data.len() as u16).to_le_bytes());
        inner.extend_from_slice(&self.data);
        // trailer: radius, then a fixed reserved byte — per §4.8 item 12.
        inner.push(0x00);
        inner.push(0x05);

        let mut payload = Vec::with_capacity(2 + inner.len());
        payload.extend_from_slice(&(inner.len() as u16).to_le_bytes());
        payload.extend_from_slice(&inner);
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::tests::hex;

    /// Scenario 2 from the protocol's testable-properties list.
    #[test]
    fn test_scenario_aps_data_indication() {
        let bytes = hex(
            "1702002b0024002a0200000103336a0e00002618840304010600070018880a0000100000af1faa000104ab04fb",
        );
        let frame = crate::frame::Frame::deserialize(&bytes).unwrap();
        assert_eq!(frame.command_id, crate::commands::CommandId::ApsDataIndication);
        assert_eq!(frame.sequence, 2);

        let (msg, _dev_state) = Message::parse_indication(&frame.payload).unwrap();
        assert_eq!(msg.src, Address::Ieee(0x84182600000E6A33, 3));
        assert_eq!(msg.dest, Address::Nwk(0x0000, 1));
        assert_eq!(msg.cluster_id, 0x0006);
        assert_eq!(msg.profile_id, 0x0104);
    }

    #[test]
    fn test_group_address_rejected_in_source_position() {
        // src_addr_mode byte = 0x01 (Group) must be rejected.
        let mut reader = PayloadReader::new(&[0x01, 0x00, 0x00]);
        assert!(Address::parse(&mut reader, false).is_err());
    }
}
