use serde::{Deserialize, Serialize};
use std::fmt;

/// Temporary C-RNTI.  Assigned by the eNB per connection attempt and used as the UE key.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Crnti(pub u16);

impl fmt::Display for Crnti {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RrcTransactionIdentifier(pub u16);

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlmnIdentity(pub u32);

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interface {
    Uu,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    // Random access, before the UE has a C-RNTI.
    Rach,
    // SRB0
    Ccch,
    // SRB1
    Dcch,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelInfo {
    pub channel: Channel,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UeIdentityType {
    RandomValue,
    STmsi,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct UeIdentity {
    pub identity_type: UeIdentityType,
    pub value: u64,
}

/// TS36.331 EstablishmentCause
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstablishmentCause {
    Emergency,
    HighPriorityAccess,
    MtAccess,
    MoSignalling,
    MoData,
    DelayTolerantAccess,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NasMessageType {
    AttachRequest,
    DetachRequest,
    TrackingAreaUpdateRequest,
    ServiceRequest,
}

/// The dedicated NAS message carried in RrcConnectionSetupComplete.  Opaque to RRC.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NasInfo {
    pub nas_message_type: NasMessageType,
    #[serde(default)]
    pub nas_message: Vec<u8>,
}

impl NasInfo {
    pub fn new(nas_message_type: NasMessageType) -> Self {
        NasInfo {
            nas_message_type,
            nas_message: vec![],
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum RrcMessage {
    RandomAccessPreamble {
        preamble_id: u8,
    },
    RandomAccessResponse {
        preamble_id: u8,
        temporary_crnti: Crnti,
        uplink_grant: u32,
    },
    RrcConnectionRequest {
        temporary_crnti: Crnti,
        ue_identity: UeIdentity,
        establishment_cause: EstablishmentCause,
    },
    RrcConnectionSetup {
        temporary_crnti: Crnti,
        rrc_transaction_identifier: RrcTransactionIdentifier,
    },
    RrcConnectionSetupComplete {
        rrc_transaction_identifier: RrcTransactionIdentifier,
        selected_plmn_identity: PlmnIdentity,
        nas_info: NasInfo,
    },
}

impl RrcMessage {
    pub fn name(&self) -> &'static str {
        match self {
            RrcMessage::RandomAccessPreamble { .. } => "RandomAccessPreamble",
            RrcMessage::RandomAccessResponse { .. } => "RandomAccessResponse",
            RrcMessage::RrcConnectionRequest { .. } => "RrcConnectionRequest",
            RrcMessage::RrcConnectionSetup { .. } => "RrcConnectionSetup",
            RrcMessage::RrcConnectionSetupComplete { .. } => "RrcConnectionSetupComplete",
        }
    }
}

/// The unit sent over the transport: which interface and channel a message travels on, plus the
/// message.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RrcPdu {
    pub interface: Interface,
    pub channel_info: ChannelInfo,
    pub message: RrcMessage,
}

impl RrcPdu {
    pub fn into_parts(self) -> (Interface, ChannelInfo, RrcMessage) {
        (self.interface, self.channel_info, self.message)
    }
}
