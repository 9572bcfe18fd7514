pub mod expiry;
pub mod format;
pub mod mrz;

pub use expiry::{parse_document_date, ExpiryValidator};
pub use format::FormatValidator;
pub use mrz::MrzValidator;
