mod data;
mod enb;
mod procedures;

pub use data::*;
pub use enb::Enb;
pub use procedures::{
    EnbCompletionCallback, EnbConnectionProcedure, EnbDispatcher, Expiry, NamedTimers,
    ProcedureResult, RetryPolicy, TimerAction, TimerId, UeCompletionCallback,
    UeConnectionProcedure, UeIdentityInfo, UeTimerConfig,
};
