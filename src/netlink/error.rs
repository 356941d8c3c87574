use std::fmt;

use thiserror::Error;

/// Kernel failure conditions callers are allowed to branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkErrorKind {
    /// The link (or the thing looked up) does not exist.
    NotFound,
    /// An identical entry is already installed.
    AlreadyExists,
    /// The entry to delete is already gone.
    Gone,
    /// Anything else.
    Other,
}

impl fmt::Display for LinkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkErrorKind::NotFound => "not found",
            LinkErrorKind::AlreadyExists => "already exists",
            LinkErrorKind::Gone => "gone",
            LinkErrorKind::Other => "failed",
        };
        f.write_str(s)
    }
}

/// Error returned by every [`LinkRepository`](super::LinkRepository) operation.
#[derive(Debug, Error)]
#[error("{op} {target}: {kind} ({detail})")]
pub struct LinkError {
    kind: LinkErrorKind,
    op: &'static str,
    target: String,
    detail: String,
}

impl LinkError {
    pub fn new(
        kind: LinkErrorKind,
        op: &'static str,
        target: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            op,
            target: target.into(),
            detail: detail.into(),
        }
    }

    pub fn kind(&self) -> LinkErrorKind {
        self.kind
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == LinkErrorKind::NotFound
    }

    pub fn is_already_exists(&self) -> bool {
        self.kind == LinkErrorKind::AlreadyExists
    }

    /// Both "nothing to delete" flavours the kernel reports.
    pub fn is_gone(&self) -> bool {
        matches!(self.kind, LinkErrorKind::Gone | LinkErrorKind::NotFound)
    }

    /// Map a raw netlink error code (negative errno) to a kind.
    pub fn kind_from_errno(code: i32) -> LinkErrorKind {
        match -code {
            libc::ENODEV | libc::ENOENT => LinkErrorKind::NotFound,
            libc::EEXIST => LinkErrorKind::AlreadyExists,
            libc::ESRCH | libc::EADDRNOTAVAIL => LinkErrorKind::Gone,
            _ => LinkErrorKind::Other,
        }
    }
}

/// Treat an "already exists" failure as success.
pub fn tolerate_exists(res: Result<(), LinkError>) -> Result<(), LinkError> {
    match res {
        Err(e) if e.is_already_exists() => {
            tracing::debug!("ignoring benign race: {}", e);
            Ok(())
        }
        other => other,
    }
}

/// Treat a "does not exist" failure on delete as success.
pub fn tolerate_gone(res: Result<(), LinkError>) -> Result<(), LinkError> {
    match res {
        Err(e) if e.is_gone() => {
            tracing::debug!("ignoring benign race: {}", e);
            Ok(())
        }
        other => other,
    }
}
