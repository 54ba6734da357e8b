pub mod answers;
pub mod parser;

pub use answers::DefaultAnswer;
pub use parser::{is_message_complete, parse, Method, ParsedHeader, Version};
