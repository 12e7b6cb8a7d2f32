use std::fmt;

/// Everything that can go wrong while compiling one method or writing the
/// output file.
///
/// Errors inside a single method's pipeline are fatal to that method only;
/// the emitter reports them and moves on to the next method (the final exit
/// status still reflects that something failed).
#[derive(Debug)]
pub enum Error {
    /// Unknown opcode, truncated operand, or an out-of-range/ill-typed
    /// constant-pool reference.
    MalformedBytecode { method: String, detail: String },

    /// A branch displacement or call target that does not resolve to an
    /// instruction boundary (or, at link time, to a known method).
    UnreachableTarget { method: String, detail: String },

    /// The interference graph was inconsistent and coloring cannot proceed.
    AllocationFailure { method: String, detail: String },

    /// Reading the class file or writing the assembly output failed.
    IoError(std::io::Error),
}

impl Error {
    pub fn malformed(method: &str, detail: impl Into<String>) -> Error {
        Error::MalformedBytecode {
            method: method.to_owned(),
            detail: detail.into(),
        }
    }

    pub fn unreachable(method: &str, detail: impl Into<String>) -> Error {
        Error::UnreachableTarget {
            method: method.to_owned(),
            detail: detail.into(),
        }
    }

    pub fn allocation(method: &str, detail: impl Into<String>) -> Error {
        Error::AllocationFailure {
            method: method.to_owned(),
            detail: detail.into(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::MalformedBytecode { method, detail } => {
                write!(f, "malformed bytecode in {}: {}", method, detail)
            }
            Error::UnreachableTarget { method, detail } => {
                write!(f, "unresolvable target in {}: {}", method, detail)
            }
            Error::AllocationFailure { method, detail } => {
                write!(f, "register allocation failed in {}: {}", method, detail)
            }
            Error::IoError(err) => write!(f, "i/o error: {}", err),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::IoError(err)
    }
}
