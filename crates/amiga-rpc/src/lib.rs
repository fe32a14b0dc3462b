//! amiga-rpc
//!
//! JSON-RPC 2.0 server for the donation cycle engine.
//!
//! Namespace: "amiga"
//! Methods that act on someone's behalf take an `RpcCredentials` object
//! first; the actor is whoever those credentials log in as.
//! Methods:
//!   amiga_createParticipant        - register a participant
//!   amiga_authenticate             - check credentials, return identity
//!   amiga_getParticipant           - participant by id
//!   amiga_getParticipantByUsername - participant by username
//!   amiga_getParticipants          - every participant
//!   amiga_resolveDonationTarget    - who a donor pays next, and how much
//!   amiga_recordDonation           - record one donation as the caller
//!   amiga_listDonations            - sent and received transfers
//!   amiga_updatePixKey             - change a payment key
//!   amiga_deleteParticipant        - admin: remove a participant (cascades)
//!   amiga_assignReferrer           - admin: set a participant's referrer
//!   amiga_getStageQueue            - a stage's fair-queue order
//!   amiga_getCycleInfo             - active cycle parameters

pub mod api;
pub mod server;
pub mod types;

pub use server::RpcServer;
pub use server::RpcServerState;
pub use types::{
    RpcCredentials, RpcCycleInfo, RpcDonationHistory, RpcDonationReceipt, RpcDonationTarget, RpcParticipant,
    RpcStageAmount, RpcTransfer,
};
