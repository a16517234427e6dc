//! Error types shared by the installer and the firmware engine.
//!
//! Nothing here is ever raised past a trampoline boundary: shims turn these
//! into the status values the Apple drivers expect, and the installer turns
//! them into log lines and a clear progress bit.

/// Failure to resolve or route a single hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookError {
    /// The patch engine found no symbol with this name in the module.
    NotFound(&'static str),
    /// The symbol resolved, but the patch engine refused the trampoline.
    RouteFailed(&'static str),
    /// The instruction pattern for an embedded constant was not found.
    PatternNotFound,
    /// The pattern matched, but the constant behind it is out of range.
    ImplausibleSize(u32),
    /// The patch engine refused to overwrite a code block.
    CodeWriteFailed(&'static str),
}

impl core::fmt::Display for HookError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound(symbol) => write!(f, "failed to resolve {symbol}"),
            Self::RouteFailed(symbol) => write!(f, "failed to route {symbol}"),
            Self::PatternNotFound => f.write_str("size field pattern not found"),
            Self::ImplausibleSize(size) => write!(f, "implausible size field value {size:#x}"),
            Self::CodeWriteFailed(symbol) => write!(f, "failed to overwrite {symbol}"),
        }
    }
}

/// Failure during a GuC/HuC firmware load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareError {
    /// A shared or staging buffer could not be allocated.
    AllocationFailed { size: usize },
    /// Kernel memory could not be made writable for the blob copy.
    ProtectionFailed,
    /// A bounded register poll ran out of ticks.
    Timeout { register: u32, last: u32 },
    /// No substitute firmware or resolved address exists for this slot.
    SlotUnavailable,
    /// A mandatory precondition failed; the hardware state is undefined.
    ///
    /// Shims never return this to the driver. It is handed to
    /// [`Platform::fatal`](crate::engine::Platform::fatal).
    Unrecoverable(&'static str),
}

impl FirmwareError {
    /// Whether this error must stop the load attempt outright.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, Self::Unrecoverable(_))
    }
}

impl core::fmt::Display for FirmwareError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::AllocationFailed { size } => {
                write!(f, "buffer allocation of {size:#x} bytes failed")
            },
            Self::ProtectionFailed => f.write_str("kernel write protection upgrade failed"),
            Self::Timeout { register, last } => write!(
                f,
                "timed out polling register {register:#06x} (last value {last:#010x})"
            ),
            Self::SlotUnavailable => f.write_str("firmware slot unavailable"),
            Self::Unrecoverable(reason) => write!(f, "unrecoverable: {reason}"),
        }
    }
}
