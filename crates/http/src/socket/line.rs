/// Character encoding used to decode a received line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LineEncoding {
    #[default]
    Utf8,
    Latin1,
    Ascii,
}

impl LineEncoding {
    /// Decodes `bytes`, returning `None` if they are not valid in this encoding.
    pub fn decode(self, bytes: &[u8]) -> Option<String> {
        match self {
            Self::Utf8 => std::str::from_utf8(bytes).ok().map(str::to_owned),
            Self::Latin1 => Some(bytes.iter().copied().map(char::from).collect()),
            Self::Ascii => {
                if bytes.is_ascii() {
                    Some(bytes.iter().copied().map(char::from).collect())
                } else {
                    None
                }
            }
        }
    }
}
