use std::fmt;

use thiserror::Error;

macro_rules! internal_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Internal {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Internal {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// A Win32-compatible error number, as stored in the per-thread error state.
///
/// The value space is the one returned by `GetLastError`. Any 32-bit value may be
/// stored; the associated constants name the codes this crate produces itself.
///
/// # Examples
///
/// ```rust
/// use dotpal::ErrorCode;
///
/// assert_eq!(ErrorCode::INVALID_PARAMETER.value(), 87);
/// assert_eq!(ErrorCode::from(87u32), ErrorCode::INVALID_PARAMETER);
/// assert!(ErrorCode::SUCCESS.is_success());
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ErrorCode(u32);

impl ErrorCode {
    /// The operation completed successfully.
    pub const SUCCESS: ErrorCode = ErrorCode(0);
    /// The system cannot find the file specified.
    pub const FILE_NOT_FOUND: ErrorCode = ErrorCode(2);
    /// Access is denied.
    pub const ACCESS_DENIED: ErrorCode = ErrorCode(5);
    /// Not enough memory resources are available to process this command.
    pub const NOT_ENOUGH_MEMORY: ErrorCode = ErrorCode(8);
    /// The access code is invalid.
    pub const INVALID_ACCESS: ErrorCode = ErrorCode(12);
    /// The program issued a command but the command length is incorrect.
    pub const BAD_LENGTH: ErrorCode = ErrorCode(24);
    /// The parameter is incorrect.
    pub const INVALID_PARAMETER: ErrorCode = ErrorCode(87);
    /// The data area passed to a system call is too small.
    pub const INSUFFICIENT_BUFFER: ErrorCode = ErrorCode(122);
    /// The system could not find the environment option that was entered.
    pub const ENVVAR_NOT_FOUND: ErrorCode = ErrorCode(203);
    /// No more data is available.
    pub const NO_MORE_ITEMS: ErrorCode = ErrorCode(259);
    /// Attempt to access invalid address.
    pub const INVALID_ADDRESS: ErrorCode = ErrorCode(487);
    /// Invalid access to memory location.
    pub const NOACCESS: ErrorCode = ErrorCode(998);
    /// An internal error occurred.
    pub const INTERNAL_ERROR: ErrorCode = ErrorCode(1359);

    /// Creates an error code from its raw value.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        ErrorCode(value)
    }

    /// Returns the raw numeric value.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Returns `true` for [`ErrorCode::SUCCESS`].
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.0 == 0
    }

    /// Translates a POSIX `errno` value into the closest Win32 error code.
    ///
    /// # Arguments
    ///
    /// * `errno` - The raw OS error number
    #[must_use]
    pub fn from_errno(errno: i32) -> Self {
        match errno {
            0 => ErrorCode::SUCCESS,
            libc::ENOENT => ErrorCode::FILE_NOT_FOUND,
            libc::EACCES | libc::EPERM => ErrorCode::ACCESS_DENIED,
            libc::ENOMEM | libc::EAGAIN => ErrorCode::NOT_ENOUGH_MEMORY,
            libc::EINVAL => ErrorCode::INVALID_PARAMETER,
            libc::EFAULT => ErrorCode::NOACCESS,
            libc::ERANGE | libc::ENAMETOOLONG => ErrorCode::INSUFFICIENT_BUFFER,
            _ => ErrorCode::INTERNAL_ERROR,
        }
    }

    fn name(self) -> Option<&'static str> {
        Some(match self {
            ErrorCode::SUCCESS => "ERROR_SUCCESS",
            ErrorCode::FILE_NOT_FOUND => "ERROR_FILE_NOT_FOUND",
            ErrorCode::ACCESS_DENIED => "ERROR_ACCESS_DENIED",
            ErrorCode::NOT_ENOUGH_MEMORY => "ERROR_NOT_ENOUGH_MEMORY",
            ErrorCode::INVALID_ACCESS => "ERROR_INVALID_ACCESS",
            ErrorCode::BAD_LENGTH => "ERROR_BAD_LENGTH",
            ErrorCode::INVALID_PARAMETER => "ERROR_INVALID_PARAMETER",
            ErrorCode::INSUFFICIENT_BUFFER => "ERROR_INSUFFICIENT_BUFFER",
            ErrorCode::ENVVAR_NOT_FOUND => "ERROR_ENVVAR_NOT_FOUND",
            ErrorCode::NO_MORE_ITEMS => "ERROR_NO_MORE_ITEMS",
            ErrorCode::INVALID_ADDRESS => "ERROR_INVALID_ADDRESS",
            ErrorCode::NOACCESS => "ERROR_NOACCESS",
            ErrorCode::INTERNAL_ERROR => "ERROR_INTERNAL_ERROR",
            _ => return None,
        })
    }
}

impl From<u32> for ErrorCode {
    fn from(value: u32) -> Self {
        ErrorCode(value)
    }
}

impl From<ErrorCode> for u32 {
    fn from(code: ErrorCode) -> Self {
        code.0
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} ({})", self.0),
            None => write!(f, "0x{:08X}", self.0),
        }
    }
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Every variant maps onto a Win32 error number through [`Error::code`], which is what the
/// sentinel-style functions in [`crate::win32`] store into the calling thread's error state.
///
/// # Error Categories
///
/// ## Invalid usage
/// - [`Error::InvalidParameter`] - Bad flag combination, zero size, malformed entry
/// - [`Error::InvalidAddress`] - Address not covered by a tracked reservation
/// - [`Error::InvalidAccess`] - The OS refused a protection change
/// - [`Error::OutOfBounds`] - A read reached past the end of a mapped image
///
/// ## Resource exhaustion
/// - [`Error::NotEnoughMemory`] - Address space, heap limit or allocator exhausted
/// - [`Error::NoMoreItems`] - No free TLS index
///
/// ## Query results
/// - [`Error::EnvVarNotFound`] - No such environment variable
///
/// ## I/O and external errors
/// - [`Error::Io`] - Filesystem and syscall errors
///
/// # Examples
///
/// ```rust
/// use dotpal::{Error, ErrorCode, Pal, PalConfig};
///
/// let pal = Pal::new(PalConfig::isolated())?;
/// match pal.environment().get_environment_variable("MISSING", &mut []) {
///     Err(Error::EnvVarNotFound(name)) => assert_eq!(name, "MISSING"),
///     other => panic!("unexpected {other:?}"),
/// }
/// assert_eq!(Error::NotEnoughMemory.code(), ErrorCode::NOT_ENOUGH_MEMORY);
/// # Ok::<(), dotpal::Error>(())
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// A parameter was rejected before any state changed.
    ///
    /// Covers zero sizes, unsupported flag combinations, malformed `NAME=VALUE`
    /// entries and similar caller mistakes.
    #[error("Invalid parameter - {0}")]
    InvalidParameter(&'static str),

    /// The address does not belong to a region this layer tracks, or the requested range
    /// leaves the region it starts in.
    #[error("Invalid address 0x{address:X} - {reason}")]
    InvalidAddress {
        /// The offending address
        address: usize,
        /// Why the address was rejected
        reason: &'static str,
    },

    /// Address space, heap budget or the platform allocator is exhausted.
    #[error("Not enough memory")]
    NotEnoughMemory,

    /// The named environment variable does not exist.
    #[error("Environment variable not found - {0}")]
    EnvVarNotFound(String),

    /// Every TLS index is in use.
    #[error("No more items available")]
    NoMoreItems,

    /// The OS denied the requested access change.
    #[error("Invalid access")]
    InvalidAccess,

    /// An out of bound access was attempted on a mapped image.
    ///
    /// This error occurs when a requested range reaches beyond the end of the mapped data.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// Internal bookkeeping went out of sync with the OS.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of the inconsistency
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Internal - {file}:{line}: {message}")]
    Internal {
        /// The message to be printed for the Internal error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// File or syscall error.
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns the Win32 error number reported for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::InvalidParameter(_) => ErrorCode::INVALID_PARAMETER,
            Error::InvalidAddress { .. } => ErrorCode::INVALID_ADDRESS,
            Error::NotEnoughMemory => ErrorCode::NOT_ENOUGH_MEMORY,
            Error::EnvVarNotFound(_) => ErrorCode::ENVVAR_NOT_FOUND,
            Error::NoMoreItems => ErrorCode::NO_MORE_ITEMS,
            Error::InvalidAccess => ErrorCode::INVALID_ACCESS,
            Error::OutOfBounds => ErrorCode::NOACCESS,
            Error::Empty => ErrorCode::BAD_LENGTH,
            Error::Internal { .. } => ErrorCode::INTERNAL_ERROR,
            Error::Io(error) => error
                .raw_os_error()
                .map_or(ErrorCode::INTERNAL_ERROR, ErrorCode::from_errno),
        }
    }

    /// Stores [`Error::code`] into the calling thread's error state.
    pub fn record(&self) {
        crate::lasterror::set_last_error(self.code());
    }
}
