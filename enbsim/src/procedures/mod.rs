mod enb_connection;
mod enb_dispatcher;
mod procedure;
mod timer;
mod ue_connection;

pub use enb_connection::{EnbCompletionCallback, EnbConnectionProcedure};
pub use enb_dispatcher::EnbDispatcher;
pub use procedure::ProcedureResult;
pub use timer::{Expiry, NamedTimers, RetryPolicy, TimerAction, TimerId};
pub use ue_connection::{
    UeCompletionCallback, UeConnectionProcedure, UeIdentityInfo, UeTimerConfig,
};
