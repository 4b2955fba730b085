//! Command parser — classifies inbound text frames.
//!
//! DESIGN
//! ======
//! Pure functions, no session state. The first frame of a connection is the
//! display name and goes through `parse_identity`; every later frame goes
//! through `parse`.
//!
//! Any frame whose trimmed text starts with `/` is a command. Unknown or
//! misused commands are errors rather than chat text so a typo like `/jion`
//! never gets broadcast to the board.

pub const JOIN: &str = "/join";
pub const LEAVE: &str = "/leave";
pub const LIST: &str = "/list";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Identify(String),
    Join(String),
    Leave,
    List,
    PlainMessage(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("usage: /join <board_name>")]
    MissingBoardName,
    #[error("{0} takes no arguments")]
    UnexpectedArgument(&'static str),
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("display name must not be empty")]
    EmptyIdentity,
    #[error("first frame must be a display name, got command {0}")]
    CommandAsIdentity(String),
}

/// Parse the first frame of a session as a display name.
///
/// # Errors
///
/// Returns an error if the name is blank or looks like a command.
pub fn parse_identity(text: &str) -> Result<Command, ParseError> {
    let name = text.trim();
    if name.is_empty() {
        return Err(ParseError::EmptyIdentity);
    }
    if name.starts_with('/') {
        return Err(ParseError::CommandAsIdentity(keyword(name).to_owned()));
    }
    Ok(Command::Identify(name.to_owned()))
}

/// Parse a post-identity frame.
///
/// Returns `Ok(None)` for frames that are empty after trimming; those are
/// dropped without a reply.
///
/// # Errors
///
/// Returns an error for unknown slash commands and for known commands with
/// a missing or unexpected argument.
pub fn parse(text: &str) -> Result<Option<Command>, ParseError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if !trimmed.starts_with('/') {
        return Ok(Some(Command::PlainMessage(trimmed.to_owned())));
    }

    let (word, arg) = match trimmed.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (trimmed, ""),
    };

    match word {
        JOIN if arg.is_empty() => Err(ParseError::MissingBoardName),
        JOIN => Ok(Some(Command::Join(arg.to_owned()))),
        LEAVE if arg.is_empty() => Ok(Some(Command::Leave)),
        LEAVE => Err(ParseError::UnexpectedArgument(LEAVE)),
        LIST if arg.is_empty() => Ok(Some(Command::List)),
        LIST => Err(ParseError::UnexpectedArgument(LIST)),
        other => Err(ParseError::UnknownCommand(other.to_owned())),
    }
}

fn keyword(text: &str) -> &str {
    text.split_once(char::is_whitespace)
        .map_or(text, |(word, _)| word)
}

#[cfg(test)]
#[path = "command_test.rs"]
mod tests;
