//! Chat room errors

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("name {0:?} is already taken")]
    NameTaken(String),

    #[error("invalid name {0:?}: use 3 to 36 letters, digits, '_' or '-'")]
    InvalidName(String),

    #[error("you are not allowed to use /{0}")]
    Permission(String),

    #[error("chat room is closed")]
    RoomClosed,

    #[error("message is longer than {max} characters")]
    MessageTooLong { max: usize },

    #[error("unknown command /{0}, try /help")]
    UnknownCommand(String),

    #[error("no user named {0:?}")]
    UnknownUser(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("unable to load emotes from {path}: {source}")]
    Init {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
