//! Bundled remote drivers.

pub mod http;
pub mod mega;

pub use self::http::{HttpAction, HttpDriver};
pub use self::mega::{MegaAction, MegaDriver};
