mod errors;
mod backoff;
mod escape;

pub use self::errors::{Error, ErrorKind, Result};
pub use self::backoff::Backoff;
pub use self::escape::{escape_str, quote_ident, SqlArg};
