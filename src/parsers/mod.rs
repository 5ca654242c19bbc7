//! Data group content parsers
//!
//! - `mrz`: TD1/TD2/TD3 machine readable zone decoding (DG1 or raw text)
//! - `dg2`: ISO 19794-5 facial record extraction (JPEG / JPEG2000)

pub mod dg2;
pub mod mrz;

pub use dg2::{parse_dg2, FaceImage, ImageFormat};
pub use mrz::{MrzData, MrzFormat, MrzParser};
