//! HTJ2K/FBCOT block coding (ISO/IEC 15444-15), the alternative to
//! [`crate::ebcot`] selected by [`crate::config::BlockCoder::Ht`].

pub mod coder;
pub mod mel;

pub use coder::{decode, decode_checked, encode};
