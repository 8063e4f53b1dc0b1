use std::fmt;
use std::str::FromStr;

/// A line typed at the prompt
#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Dele(String),
    Help,
    Jobs,
    Mkd(String),
    /// `None` prompts for the password
    Pass(Option<String>),
    Pasv,
    Port,
    Pwd,
    Quit,
    Rest(String),
    Retr(String),
    Stor(String),
    User(String),
}

#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    Empty,
    Unsupported(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "Empty command"),
            Self::Unsupported(verb) => write!(f, "Unsupported command: {verb}"),
        }
    }
}

impl FromStr for Command {
    type Err = ParseError;

    /// A verb, case insensitive, then everything up to the end of the line as its argument.
    /// Arguments are never validated here.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let line = s.trim();
        let (verb, arg) = match line.split_once(char::is_whitespace) {
            Some((verb, arg)) => (verb, arg.trim_start().to_string()),
            None => (line, String::new()),
        };
        match verb.to_ascii_uppercase().as_str() {
            "" => Err(ParseError::Empty),
            "DELE" => Ok(Self::Dele(arg)),
            "HELP" => Ok(Self::Help),
            "JOBS" => Ok(Self::Jobs),
            "MKD" => Ok(Self::Mkd(arg)),
            "PASS" if arg.is_empty() => Ok(Self::Pass(None)),
            "PASS" => Ok(Self::Pass(Some(arg))),
            "PASV" => Ok(Self::Pasv),
            // the address is always the one of our own listener
            "PORT" => Ok(Self::Port),
            "PWD" => Ok(Self::Pwd),
            "QUIT" => Ok(Self::Quit),
            "REST" => Ok(Self::Rest(arg)),
            "RETR" => Ok(Self::Retr(arg)),
            "STOR" => Ok(Self::Stor(arg)),
            "USER" => Ok(Self::User(arg)),
            _ => Err(ParseError::Unsupported(verb.to_string())),
        }
    }
}
