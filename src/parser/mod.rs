//! Wire decoding: frame codec (§4.1), BMP message parser (§4.2), BGP UPDATE parser (§4.3).

pub mod bgp;
pub mod bmp;
pub mod frame;
pub mod utils;

pub use crate::error::{BgpParseError, BmpParseError, FrameError, ParserError};
pub use utils::ReadUtils;
