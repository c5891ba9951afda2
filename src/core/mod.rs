//! Resolution core: versions, constraint algebra, artifact selection and
//! dependency closure. Nothing here touches the filesystem.

pub mod artifact;
pub mod constraint;
pub mod release;
pub mod resolve;
pub mod version;
