/// A command sent by the remote controller over the TCP link.
///
/// Each command is a single ASCII token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `s`: start a new recording
    Start,
    /// `n`: stop the current recording
    Stop,
    /// `r`: stream the last completed recording back
    Retrieve,
    /// `x`: close the session
    Disconnect,
}

impl Command {
    /// Parses one token. Anything other than the four known letters is `None`.
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "s" => Some(Command::Start),
            "n" => Some(Command::Stop),
            "r" => Some(Command::Retrieve),
            "x" => Some(Command::Disconnect),
            _ => None,
        }
    }

    /// Splits one received network message into tokens.
    ///
    /// Tokens are separated by ASCII whitespace so a trailing newline from a
    /// terminal client does not turn `s` into an unknown command. Unknown
    /// tokens are returned as `None` and are meant to be ignored.
    pub fn parse_message(message: &[u8]) -> impl Iterator<Item = Option<Command>> + '_ {
        message
            .split(|b| b.is_ascii_whitespace() || *b == 0)
            .filter(|token| !token.is_empty())
            .map(|token| std::str::from_utf8(token).ok().and_then(Command::parse))
    }

    pub fn token(self) -> char {
        match self {
            Command::Start => 's',
            Command::Stop => 'n',
            Command::Retrieve => 'r',
            Command::Disconnect => 'x',
        }
    }
}
