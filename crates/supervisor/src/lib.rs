//! Process supervisor: a concurrent registry of spawned child processes.
//!
//! Each spawned child gets a handle in the registry and a dedicated reaper
//! task. The reaper publishes the terminal state (exit instant, exit code,
//! wait error, running=false) under a single write-lock acquisition, so a
//! snapshot can never observe `running == false` with unset terminal fields.
//! Output is captured to `<data_dir>/proc/<id>/{stdout,stderr}`; those files
//! are written only by the child and stay on disk for the server's lifetime.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use dashmap::DashMap;
use nix::sys::signal::{kill as send_signal, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tracing::{debug, warn};
use uuid::Uuid;

use remex_core::context::CallContext;
use remex_core::error::Error;
use remex_core::ids;
use remex_core::process::{OutputStream, ProcessInfo};

// Mutable lifecycle fields, guarded by the handle's lock. All of them are
// written in one critical section by the reaper.
#[derive(Debug)]
struct Lifecycle {
    running: bool,
    exit: SystemTime,
    exit_code: i32,
    wait_error: Option<String>,
}

// Server-side record of one spawned child.
#[derive(Debug)]
struct ProcessHandle {
    id: Uuid,
    owner_id: String,
    path: String,
    args: Vec<String>,
    pid: u32,
    create: SystemTime,
    stdout_path: PathBuf,
    stderr_path: PathBuf,
    state: RwLock<Lifecycle>,
}

impl ProcessHandle {
    // Consistent snapshot of the observable fields.
    fn snapshot(&self) -> ProcessInfo {
        let state = self.state.read().expect("lifecycle lock poisoned");
        ProcessInfo {
            id: self.id,
            pid: self.pid,
            exit_code: state.exit_code,
            running: state.running,
            path: self.path.clone(),
            args: self.args.clone(),
            owner_id: self.owner_id.clone(),
            create: self.create,
            exit: state.exit,
        }
    }
}

/// Owns the process registry and the on-disk data directory.
///
/// Handles are inserted at spawn and never removed; reaper tasks hold an
/// `Arc` to their handle only, never to the registry.
#[derive(Debug)]
pub struct Supervisor {
    data_dir: PathBuf,
    registry: DashMap<Uuid, Arc<ProcessHandle>>,
}

impl Supervisor {
    /// Create a supervisor rooted at `data_dir`. Nothing is created on disk
    /// until the first spawn.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into(), registry: DashMap::new() }
    }

    /// Root of the per-process output directories.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Spawn `path` with `args`, capturing output under the data directory.
    ///
    /// Requires a principal in `ctx`; the caller becomes the owner of the
    /// new process. On spawn failure nothing is registered and the OS error
    /// is preserved as the cause.
    pub async fn exec(&self, ctx: &CallContext, path: &str, args: &[String]) -> Result<Uuid, Error> {
        let owner = ctx.principal().ok_or(Error::Unauthenticated)?;

        let id = ids::new_process_id();
        let proc_dir = self.data_dir.join("proc").join(id.to_string());
        let mut dir = tokio::fs::DirBuilder::new();
        dir.recursive(true);
        #[cfg(unix)]
        dir.mode(0o755);
        dir.create(&proc_dir).await.map_err(Error::Io)?;

        let stdout_path = proc_dir.join(OutputStream::Stdout.file_name());
        let stderr_path = proc_dir.join(OutputStream::Stderr.file_name());
        let stdout = std::fs::File::create(&stdout_path).map_err(Error::Io)?;
        // If this fails, dropping `stdout` closes the file already created.
        let stderr = std::fs::File::create(&stderr_path).map_err(Error::Io)?;

        let create = SystemTime::now();
        let child = Command::new(path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(Error::Spawn)?;
        let pid = child.id().unwrap_or_default();

        let handle = Arc::new(ProcessHandle {
            id,
            owner_id: owner.to_string(),
            path: path.to_string(),
            args: args.to_vec(),
            pid,
            create,
            stdout_path,
            stderr_path,
            state: RwLock::new(Lifecycle {
                running: true,
                exit: SystemTime::UNIX_EPOCH,
                exit_code: 0,
                wait_error: None,
            }),
        });
        self.registry.insert(id, handle.clone());
        debug!(%id, pid, path, "spawned process");

        tokio::spawn(reap(handle, child));
        Ok(id)
    }

    /// Snapshots of every registered process, newest first.
    ///
    /// The listing is not filtered by owner; method-level policy is the
    /// gate for this operation.
    pub fn list_process_info(&self, _ctx: &CallContext) -> Result<Vec<ProcessInfo>, Error> {
        let mut infos: Vec<ProcessInfo> =
            self.registry.iter().map(|entry| entry.value().snapshot()).collect();
        infos.sort_by(|a, b| b.create.cmp(&a.create));
        Ok(infos)
    }

    /// Snapshot of one process, owner-only.
    pub fn get_process_info(&self, ctx: &CallContext, id: Uuid) -> Result<ProcessInfo, Error> {
        Ok(self.owned_handle(ctx, id)?.snapshot())
    }

    /// Deliver a POSIX signal to a running child, owner-only.
    ///
    /// The signal number is the raw wire integer; numbers that do not name
    /// a known signal are refused. The check against an already-reaped
    /// child and the send are serialized with the reaper through the
    /// handle's lock; the OS error is surfaced as-is.
    pub fn kill(&self, ctx: &CallContext, id: Uuid, signal: i32) -> Result<(), Error> {
        let handle = self.owned_handle(ctx, id)?;
        let signal = Signal::try_from(signal).map_err(|_| Error::InvalidArgument)?;

        let state = handle.state.read().expect("lifecycle lock poisoned");
        if !state.running {
            return Err(Error::Signal(std::io::Error::other("process already finished")));
        }
        send_signal(Pid::from_raw(handle.pid as i32), signal)
            .map_err(|errno| Error::Signal(std::io::Error::from(errno)))?;
        debug!(%id, ?signal, "signalled process");
        Ok(())
    }

    /// Whole-file read of a captured output stream, owner-only.
    ///
    /// The child may still be writing; the contract is the bytes on disk at
    /// read time.
    pub async fn read(
        &self,
        ctx: &CallContext,
        id: Uuid,
        target: OutputStream,
    ) -> Result<Vec<u8>, Error> {
        let handle = self.owned_handle(ctx, id)?;
        let path = match target {
            OutputStream::Stdout => &handle.stdout_path,
            OutputStream::Stderr => &handle.stderr_path,
        };
        tokio::fs::read(path).await.map_err(Error::Io)
    }

    // Shared precheck for handle-targeted operations, in contract order:
    // unknown id, then missing principal, then ownership.
    fn owned_handle(&self, ctx: &CallContext, id: Uuid) -> Result<Arc<ProcessHandle>, Error> {
        let handle = self.registry.get(&id).ok_or(Error::NotFound)?.clone();
        let principal = ctx.principal().ok_or(Error::Unauthenticated)?;
        if handle.owner_id != principal {
            return Err(Error::AccessDenied);
        }
        Ok(handle)
    }
}

// Waits for the child and publishes the terminal state in one write-lock
// critical section.
async fn reap(handle: Arc<ProcessHandle>, mut child: Child) {
    let result = child.wait().await;
    let mut state = handle.state.write().expect("lifecycle lock poisoned");
    state.exit = SystemTime::now();
    match result {
        Ok(status) => {
            // -1 when the child was terminated by a signal.
            state.exit_code = status.code().unwrap_or(-1);
        }
        Err(err) => {
            warn!(id = %handle.id, %err, "waiting on child failed");
            state.exit_code = -1;
            state.wait_error = Some(err.to_string());
        }
    }
    state.running = false;
    debug!(id = %handle.id, code = state.exit_code, "reaped process");
}
