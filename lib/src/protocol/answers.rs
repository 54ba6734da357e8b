/// Fixed answers sent to a client whose request is not forwarded.
///
/// These are the exact bytes written on the wire, without CRLF nor headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultAnswer {
    /// the request line could not be parsed
    Answer400,
    /// a valid request line with a method or version other than GET HTTP/1.0
    Answer405,
    /// the request grew past the maximum request size
    Answer500,
}

impl DefaultAnswer {
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            DefaultAnswer::Answer400 => b"HTTP/1.0 400 OK",
            DefaultAnswer::Answer405 => b"HTTP/1.0 405 OK",
            DefaultAnswer::Answer500 => b"HTTP/1.0 500 OK",
        }
    }
}

impl From<DefaultAnswer> for u16 {
    fn from(answer: DefaultAnswer) -> u16 {
        match answer {
            DefaultAnswer::Answer400 => 400,
            DefaultAnswer::Answer405 => 405,
            DefaultAnswer::Answer500 => 500,
        }
    }
}
