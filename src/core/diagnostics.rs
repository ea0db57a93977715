//! Fatal-diagnostic channel.
//!
//! Driver failures and command-recording contract violations are programmer
//! errors: they are reported once, with structure, and then the process
//! terminates. Recoverable conditions never come through here, they are
//! surfaced as `Result`s by the layer that detected them.

use std::fmt;

/// Classifies a fatal diagnostic so log scrapers can group them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalKind {
    /// The native GPU API returned an error the engine treats as unrecoverable.
    DriverError,
    /// A command was recorded in a state that does not allow it.
    RecordingContract,
    /// An image state transition without a registered barrier description.
    UndefinedTransition,
    /// The device was lost; the application owns any re-creation policy.
    DeviceLost,
    /// An internal invariant did not hold.
    Invariant,
}

impl fmt::Display for FatalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FatalKind::DriverError => "driver-error",
            FatalKind::RecordingContract => "recording-contract",
            FatalKind::UndefinedTransition => "undefined-transition",
            FatalKind::DeviceLost => "device-lost",
            FatalKind::Invariant => "invariant",
        };
        f.write_str(name)
    }
}

/// The structured payload flushed right before the process terminates.
#[derive(Debug, Clone)]
pub struct FatalDiagnostic {
    pub kind: FatalKind,
    pub message: String,
    /// Render-graph pass being compiled or executed, when known.
    pub pass: Option<String>,
    /// Resource involved, when known.
    pub resource: Option<String>,
}

impl FatalDiagnostic {
    pub fn new(kind: FatalKind, message: impl Into<String>) -> Self {
        FatalDiagnostic {
            kind,
            message: message.into(),
            pass: None,
            resource: None,
        }
    }

    pub fn with_pass(mut self, pass: impl Into<String>) -> Self {
        self.pass = Some(pass.into());
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }
}

/// Flushes the diagnostic through the logger and terminates the process.
pub fn fatal(diagnostic: FatalDiagnostic) -> ! {
    log::error!(
        "fatal [{}] {} (pass: {}, resource: {})",
        diagnostic.kind,
        diagnostic.message,
        diagnostic.pass.as_deref().unwrap_or("-"),
        diagnostic.resource.as_deref().unwrap_or("-"),
    );

    log::logger().flush();
    std::process::abort();
}

/// Shorthand for [`fatal`] with a formatted message.
#[macro_export]
macro_rules! render_fatal {
    ($kind:expr, $($arg:tt)*) => {
        $crate::core::diagnostics::fatal($crate::core::diagnostics::FatalDiagnostic::new(
            $kind,
            format!($($arg)*),
        ))
    };
}
