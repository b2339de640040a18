//! build - construction of RRC connection establishment PDUs

use crate::*;

fn uu(channel: Channel, message: RrcMessage) -> RrcPdu {
    RrcPdu {
        interface: Interface::Uu,
        channel_info: ChannelInfo { channel },
        message,
    }
}

pub fn random_access_preamble(preamble_id: u8) -> RrcPdu {
    uu(Channel::Rach, RrcMessage::RandomAccessPreamble { preamble_id })
}

pub fn random_access_response(
    preamble_id: u8,
    temporary_crnti: Crnti,
    uplink_grant: u32,
) -> RrcPdu {
    uu(
        Channel::Rach,
        RrcMessage::RandomAccessResponse {
            preamble_id,
            temporary_crnti,
            uplink_grant,
        },
    )
}

pub fn connection_request(
    temporary_crnti: Crnti,
    identity_type: UeIdentityType,
    identity_value: u64,
    establishment_cause: EstablishmentCause,
) -> RrcPdu {
    uu(
        Channel::Ccch,
        RrcMessage::RrcConnectionRequest {
            temporary_crnti,
            ue_identity: UeIdentity {
                identity_type,
                value: identity_value,
            },
            establishment_cause,
        },
    )
}

pub fn connection_setup(
    temporary_crnti: Crnti,
    rrc_transaction_identifier: RrcTransactionIdentifier,
) -> RrcPdu {
    uu(
        Channel::Ccch,
        RrcMessage::RrcConnectionSetup {
            temporary_crnti,
            rrc_transaction_identifier,
        },
    )
}

pub fn connection_setup_complete(
    rrc_transaction_identifier: RrcTransactionIdentifier,
    selected_plmn_identity: PlmnIdentity,
    nas_info: NasInfo,
) -> RrcPdu {
    uu(
        Channel::Dcch,
        RrcMessage::RrcConnectionSetupComplete {
            rrc_transaction_identifier,
            selected_plmn_identity,
            nas_info,
        },
    )
}
