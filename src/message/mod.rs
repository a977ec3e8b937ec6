mod nom_parser;
mod source;
pub mod tags;
mod types;

pub(crate) use self::nom_parser::ParsedLine;
pub use self::source::Source;
pub use self::types::Message;
