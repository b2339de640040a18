use std::fmt;

/// Terminal outcome of an RRC connection establishment procedure, on either side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcedureResult {
    Success,

    // eNB: RrcConnectionSetupComplete never arrived within the retry budget.
    ErrorNoConnectionCompleteMessage,

    // UE: no RandomAccessResponse within the random access timer's budget.
    ErrorRandomAccessTimeout,

    // UE: no RrcConnectionSetup within the connection setup timer's budget.
    ErrorSetupTimeout,
}

impl ProcedureResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ProcedureResult::Success)
    }
}

impl fmt::Display for ProcedureResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcedureResult::Success => "success",
            ProcedureResult::ErrorNoConnectionCompleteMessage => "no RrcConnectionSetupComplete",
            ProcedureResult::ErrorRandomAccessTimeout => "random access response timeout",
            ProcedureResult::ErrorSetupTimeout => "RrcConnectionSetup timeout",
        };
        write!(f, "{s}")
    }
}
