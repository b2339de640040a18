use rrc::{
    Crnti, EstablishmentCause, NasInfo, PlmnIdentity, RrcTransactionIdentifier, UeIdentity,
};
use std::net::SocketAddr;

/// What the eNB MAC layer knows about a UE when its RrcConnectionRequest arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestContext {
    pub temporary_crnti: Crnti,
    pub uplink_grant: u32,
    pub rrc_transaction_identifier: RrcTransactionIdentifier,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UeContext {
    pub key: Crnti,
    pub address: SocketAddr,
    pub ue_identity: UeIdentity,
    pub establishment_cause: EstablishmentCause,
    pub uplink_grant: u32,
    pub rrc_transaction_identifier: RrcTransactionIdentifier,

    // Filled in from RrcConnectionSetupComplete.
    pub selected_plmn_identity: Option<PlmnIdentity>,
    pub nas_info: Option<NasInfo>,
}

impl UeContext {
    pub fn new(
        address: SocketAddr,
        request_context: &RequestContext,
        ue_identity: UeIdentity,
        establishment_cause: EstablishmentCause,
    ) -> Self {
        UeContext {
            key: request_context.temporary_crnti,
            address,
            ue_identity,
            establishment_cause,
            uplink_grant: request_context.uplink_grant,
            rrc_transaction_identifier: request_context.rrc_transaction_identifier,
            selected_plmn_identity: None,
            nas_info: None,
        }
    }

    pub fn complete(&mut self, selected_plmn_identity: PlmnIdentity, nas_info: NasInfo) {
        self.selected_plmn_identity = Some(selected_plmn_identity);
        self.nas_info = Some(nas_info);
    }
}
