pub mod document;
pub mod model;
pub mod parser;
pub mod prompt;
pub mod service;

pub use model::{ActivityCategory, ParseError, ParsedActivity};
pub use service::ActivityParser;
