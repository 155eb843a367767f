//! deCONZ protocol command vocabulary.

/// Command IDs for the deCONZ serial protocol.
///
/// The set is closed and firmware-defined; unknown opcodes are not an
/// error (firmware revisions add new ones) — they are simply not in
/// this enum and the dispatcher logs-and-drops them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandId {
    /// APS data confirm (response to an APS data request)
    ApsDataConfirm = 0x04,
    /// Query device state
    DeviceState = 0x07,
    /// Change network state (connect/disconnect)
    ChangeNetworkState = 0x08,
    /// Read a network parameter
    ReadParameter = 0x0A,
    /// Write a network parameter
    WriteParameter = 0x0B,
    /// Query firmware version
    Version = 0x0D,
    /// Unsolicited device-state-changed notification
    DeviceStateChanged = 0x0E,
    /// Send an APS data request
    ApsDataRequest = 0x12,
    /// Pull a pending APS data indication
    ApsDataIndication = 0x17,
    /// Green Power data
    GreenPower = 0x19,
    /// MAC poll indication
    MacPoll = 0x1C,
    /// Neighbor table update
    NeighborUpdate = 0x1D,
    /// MAC beacon indication
    MacBeaconIndication = 0x1F,
}

impl CommandId {
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x04 => Some(CommandId::ApsDataConfirm),
            0x07 => Some(CommandId::DeviceState),
            0x08 => Some(CommandId::ChangeNetworkState),
            0x0A => Some(CommandId::ReadParameter),
            0x0B => Some(CommandId::WriteParameter),
            0x0D => Some(CommandId::Version),
            0x0E => Some(CommandId::DeviceStateChanged),
            0x12 => Some(CommandId::ApsDataRequest),
            0x17 => Some(CommandId::ApsDataIndication),
            0x19 => Some(CommandId::GreenPower),
            0x1C => Some(CommandId::MacPoll),
            0x1D => Some(CommandId::NeighborUpdate),
            0x1F => Some(CommandId::MacBeaconIndication),
            _ => None,
        }
    }
}

/// Network parameters addressable through READ_PARAMETER/WRITE_PARAMETER.
///
/// The six spec-normative parameters (`MacAddress`, `NwkPanId`,
/// `NwkAddress`, `NwkExtendedPanId`, `ApsDesignedCoordinator`,
/// `SecurityMode`) are wire-exact; the rest extend the catalog to the
/// full set the firmware actually exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NetworkParameter {
    MacAddress = 0x01,
    NwkPanId = 0x05,
    NwkAddress = 0x07,
    NwkExtendedPanId = 0x08,
    ApsDesignedCoordinator = 0x09,
    ChannelMask = 0x0A,
    ApsExtendedPanId = 0x0B,
    TrustCenterAddress = 0x0E,
    SecurityMode = 0x10,
    PredefinedNwkPanId = 0x15,
    NetworkKey = 0x18,
    LinkKey = 0x19,
    CurrentChannel = 0x1C,
    PermitJoin = 0x21,
    ProtocolVersion = 0x22,
    NwkUpdateId = 0x24,
    WatchdogTtl = 0x26,
}

impl NetworkParameter {
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(NetworkParameter::MacAddress),
            0x05 => Some(NetworkParameter::NwkPanId),
            0x07 => Some(NetworkParameter::NwkAddress),
            0x08 => Some(NetworkParameter::NwkExtendedPanId),
            0x09 => Some(NetworkParameter::ApsDesignedCoordinator),
            0x0A => Some(NetworkParameter::ChannelMask),
            0x0B => Some(NetworkParameter::ApsExtendedPanId),
            0x0E => Some(NetworkParameter::TrustCenterAddress),
            0x10 => Some(NetworkParameter::SecurityMode),
            0x15 => Some(NetworkParameter::PredefinedNwkPanId),
            0x18 => Some(NetworkParameter::NetworkKey),
            0x19 => Some(NetworkParameter::LinkKey),
            0x1C => Some(NetworkParameter::CurrentChannel),
            0x21 => Some(NetworkParameter::PermitJoin),
            0x22 => Some(NetworkParameter::ProtocolVersion),
            0x24 => Some(NetworkParameter::NwkUpdateId),
            0x26 => Some(NetworkParameter::WatchdogTtl),
            _ => None,
        }
    }

    /// Wire width of the parameter's value, in bytes.
    #[must_use]
    pub fn value_length(&self) -> usize {
        match self {
            NetworkParameter::ApsDesignedCoordinator
            | NetworkParameter::SecurityMode
            | NetworkParameter::PredefinedNwkPanId
            | NetworkParameter::CurrentChannel
            | NetworkParameter::PermitJoin
            | NetworkParameter::NwkUpdateId => 1,
            NetworkParameter::NwkPanId
            | NetworkParameter::NwkAddress
            | NetworkParameter::ProtocolVersion => 2,
            NetworkParameter::ChannelMask | NetworkParameter::WatchdogTtl => 4,
            NetworkParameter::MacAddress
            | NetworkParameter::NwkExtendedPanId
            | NetworkParameter::ApsExtendedPanId
            | NetworkParameter::TrustCenterAddress => 8,
            NetworkParameter::NetworkKey | NetworkParameter::LinkKey => 16,
        }
    }
}
