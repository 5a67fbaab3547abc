//! OData URL generation and value serialization

mod serialize;
mod url;

pub use serialize::*;
pub use url::*;
