// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::io;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ErrorKind {
    /// A malformed control request, i.e. bad `fn` or `id`
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("workload {0} does not exist")]
    NotFound(usize),
    /// Stop requested for a workload that is already dead
    #[error("workload {0} is not running")]
    NotRunning(usize),
    #[error("failed to spawn workload {id}: {source}")]
    Spawn {
        id: usize,
        #[source]
        source: io::Error,
    },
    #[error("failed to terminate workload {id}: {reason}")]
    Termination { id: usize, reason: String },
    #[error("workload {id} did not terminate within {timeout:?}")]
    TerminationTimeout { id: usize, timeout: Duration },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    IoError(#[from] io::Error),
    #[error("nix error: {0}")]
    NixError(#[from] nix::Error),
    #[error("an error occured: {0}")]
    ErrorMsg(String),
    #[error("an error occured: {0}")]
    ErrorStr(&'static str),
}

impl From<String> for ErrorKind {
    fn from(msg: String) -> Self {
        ErrorKind::ErrorMsg(msg)
    }
}

impl From<&'static str> for ErrorKind {
    fn from(msg: &'static str) -> Self {
        ErrorKind::ErrorStr(msg)
    }
}

#[derive(Error, Debug)]
#[error(transparent)]
pub struct Error(ErrorKind);

impl Error {
    fn from_kind(kind: ErrorKind) -> Self {
        Self(kind)
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.0
    }

    pub fn into_kind(self) -> ErrorKind {
        self.0
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::from_kind(ErrorKind::Config(msg.into()))
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::from_kind(ErrorKind::Validation(msg.into()))
    }

    pub(crate) fn termination(id: usize, reason: impl Into<String>) -> Self {
        Self::from_kind(ErrorKind::Termination {
            id,
            reason: reason.into(),
        })
    }
}

impl<E> From<E> for Error
where
    E: Into<ErrorKind>,
{
    fn from(err: E) -> Self {
        Self::from_kind(err.into())
    }
}
