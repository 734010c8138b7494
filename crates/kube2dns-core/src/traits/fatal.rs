// # Fatal Handler
//
// The engine has two failure modes it refuses to recover from in-process: a
// record mutation that cannot complete before its deadline, and a watch event
// it cannot interpret. Both end the process so that the supervisor restarts it
// and the next run resynchronizes from a full listing.

use tracing::error;

/// Terminates the process on an unrecoverable engine failure
///
/// Implementations must not return. Production code uses [`ExitProcess`];
/// tests substitute a handler that panics so the failure can be asserted.
pub trait FatalHandler: Send + Sync {
    fn fatal(&self, reason: &str) -> !;
}

/// Logs the reason and exits the process with a fixed status code
#[derive(Debug, Clone, Copy)]
pub struct ExitProcess {
    code: i32,
}

impl ExitProcess {
    pub fn new(code: i32) -> Self {
        Self { code }
    }
}

impl FatalHandler for ExitProcess {
    fn fatal(&self, reason: &str) -> ! {
        error!(exit_code = self.code, "fatal: {}", reason);
        std::process::exit(self.code)
    }
}
