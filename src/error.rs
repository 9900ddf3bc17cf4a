use derive_more::{Display, Error};
use std::path::PathBuf;

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("configuration error")]
    Config,
    #[display("monitor failed")]
    Monitor,
    #[display("could not frame data")]
    Frame,
    #[display("could not read checkpoint {}", _0.display())]
    Checkpoint(#[error(not(source))] PathBuf),
    #[display("no checkpoint at {}", _0.display())]
    NoCheckpoint(#[error(not(source))] PathBuf),
    #[display("I/O error on {}", _0.display())]
    Io(#[error(not(source))] PathBuf),
}
