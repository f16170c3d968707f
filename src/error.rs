use std::{
    error::Error,
    fmt::{self, Display},
};

use ndarray::ShapeError;
use rand_distr::NormalError;

/// The result type used in the entire crate.
pub type Result<T> = std::result::Result<T, NetErr>;

/// The crate's error type.
#[derive(Debug)]
pub enum NetErr {
    /// A declared channel count disagrees with the tensor the operator will receive.
    ChannelMismatch {
        what: String,
        got: usize,
        expected: usize,
    },
    InvalidConfig(String),
    InvalidInput {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    SpatialCollapse {
        what: String,
        height: usize,
        width: usize,
        window: usize,
    },
    Init(String),
    Shape(ShapeError),
    Parse(serde_json::Error),
}

impl NetErr {
    /// Prefixes the location of a channel or spatial failure with the enclosing component.
    pub fn within(self, scope: &str) -> Self {
        match self {
            NetErr::ChannelMismatch {
                what,
                got,
                expected,
            } => NetErr::ChannelMismatch {
                what: format!("{scope} {what}"),
                got,
                expected,
            },
            NetErr::SpatialCollapse {
                what,
                height,
                width,
                window,
            } => NetErr::SpatialCollapse {
                what: format!("{scope} {what}"),
                height,
                width,
                window,
            },
            other => other,
        }
    }
}

impl Display for NetErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetErr::ChannelMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "channel mismatch at {what}: declared {got} channels but {expected} are produced"
            ),
            NetErr::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            NetErr::InvalidInput {
                what,
                got,
                expected,
            } => write!(f, "invalid input {what}: got {got}, expected {expected}"),
            NetErr::SpatialCollapse {
                what,
                height,
                width,
                window,
            } => write!(
                f,
                "a {height}x{width} map is too small for the {window}x{window} window of {what}"
            ),
            NetErr::Init(msg) => write!(f, "initialization failed: {msg}"),
            NetErr::Shape(e) => write!(f, "shape error: {e}"),
            NetErr::Parse(e) => write!(f, "failed to parse config: {e}"),
        }
    }
}

impl Error for NetErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            NetErr::Shape(e) => Some(e),
            NetErr::Parse(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ShapeError> for NetErr {
    fn from(e: ShapeError) -> Self {
        Self::Shape(e)
    }
}

impl From<serde_json::Error> for NetErr {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e)
    }
}

impl From<NormalError> for NetErr {
    fn from(e: NormalError) -> Self {
        Self::Init(e.to_string())
    }
}
