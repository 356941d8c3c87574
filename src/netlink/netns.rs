//! Scoped network namespace entry.
//!
//! A namespace switch applies to the calling thread only. [`NetnsGuard`]
//! records the thread's namespace, switches to the target and switches back
//! when dropped, whichever way the scope is left. The guard is `!Send`: it has
//! to be dropped on the thread that created it, and that thread must not run
//! unrelated namespace-sensitive work while the guard is alive. Callers that
//! hold a guard across `.await` points must drive the future on a
//! current-thread runtime.

use std::marker::PhantomData;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};

use nix::fcntl::{open, OFlag};
use nix::sched::{setns, CloneFlags};
use nix::sys::stat::Mode;
use nix::unistd::close;
use thiserror::Error;
use tracing::{debug, error};

use super::{LinkError, LinkRepository, RtnetlinkLinks};

const THREAD_NETNS: &str = "/proc/thread-self/ns/net";

#[derive(Debug, Error)]
pub enum NetnsError {
    #[error("failed to open network namespace {}: {source}", path.display())]
    Open { path: PathBuf, source: nix::Error },

    #[error("failed to switch to network namespace {}: {source}", path.display())]
    Switch { path: PathBuf, source: nix::Error },

    #[error(transparent)]
    Connect(#[from] LinkError),
}

/// Keeps the calling thread inside a network namespace until dropped.
pub struct NetnsGuard {
    original: RawFd,
    path: PathBuf,
    _not_send: PhantomData<*const ()>,
}

impl NetnsGuard {
    pub fn enter(path: &Path) -> Result<Self, NetnsError> {
        let original = open(THREAD_NETNS, OFlag::O_RDONLY | OFlag::O_CLOEXEC, Mode::empty())
            .map_err(|source| NetnsError::Open {
                path: PathBuf::from(THREAD_NETNS),
                source,
            })?;

        let target = match open(path, OFlag::O_RDONLY | OFlag::O_CLOEXEC, Mode::empty()) {
            Ok(fd) => fd,
            Err(source) => {
                let _ = close(original);
                return Err(NetnsError::Open {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let switched = setns(target, CloneFlags::CLONE_NEWNET);
        let _ = close(target);
        if let Err(source) = switched {
            let _ = close(original);
            return Err(NetnsError::Switch {
                path: path.to_path_buf(),
                source,
            });
        }

        debug!("entered network namespace {}", path.display());
        Ok(Self {
            original,
            path: path.to_path_buf(),
            _not_send: PhantomData,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for NetnsGuard {
    fn drop(&mut self) {
        match setns(self.original, CloneFlags::CLONE_NEWNET) {
            Ok(()) => debug!("left network namespace {}", self.path.display()),
            // The thread is stranded in the pod namespace; nothing else may run on it.
            Err(e) => error!(
                "failed to restore original network namespace after {}: {}",
                self.path.display(),
                e
            ),
        }
        let _ = close(self.original);
    }
}

/// A link repository bound to another namespace for the lifetime of the scope.
///
/// The repository is dropped before the guard, so its socket is closed before
/// the thread returns to the original namespace.
pub struct Entered<L> {
    links: L,
    _guard: Option<NetnsGuard>,
}

impl<L: LinkRepository> Entered<L> {
    pub fn new(links: L, guard: Option<NetnsGuard>) -> Self {
        Self {
            links,
            _guard: guard,
        }
    }

    pub fn links(&self) -> &L {
        &self.links
    }
}

/// Opens link repositories inside other network namespaces.
pub trait Namespaces: Send + Sync {
    type Links: LinkRepository;

    fn enter(&self, path: &Path) -> Result<Entered<Self::Links>, NetnsError>;
}

/// Real namespaces under `/proc` or `/var/run/netns`.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostNamespaces;

impl Namespaces for HostNamespaces {
    type Links = RtnetlinkLinks;

    fn enter(&self, path: &Path) -> Result<Entered<RtnetlinkLinks>, NetnsError> {
        let guard = NetnsGuard::enter(path)?;
        // The socket must be created while the thread sits in the target namespace.
        let links = RtnetlinkLinks::connect()?;
        Ok(Entered::new(links, Some(guard)))
    }
}
