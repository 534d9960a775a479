//! Process helpers for relaunching the running binary.
//!
//! The host uses these to replace itself with a fresh instance after it has
//! changed something that is only picked up at startup (for example newly
//! downloaded extension dependencies).

use std::ffi::{OsStr, OsString};
use std::path::PathBuf;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for std::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `std::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
pub fn std_command(program: impl AsRef<OsStr>) -> std::process::Command {
    let mut cmd = std::process::Command::new(program);
    cmd.no_window();
    cmd
}

/// Program and arguments of a relaunch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaunchPlan {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl RelaunchPlan {
    /// Plan a relaunch of the current executable with its original arguments.
    pub fn current() -> std::io::Result<Self> {
        Ok(Self {
            program: std::env::current_exe()?,
            args: std::env::args_os().skip(1).collect(),
        })
    }

    /// Append `flag` unless it is already present.
    pub fn with_flag(mut self, flag: &str) -> Self {
        if !self.args.iter().any(|arg| arg == flag) {
            self.args.push(OsString::from(flag));
        }
        self
    }

    /// Replace the current process with the planned one.
    ///
    /// On Unix this uses `exec` and only returns if it failed. Elsewhere the new
    /// process is spawned and the current one exits with status 0.
    pub fn exec(self) -> std::io::Error {
        let mut cmd = std_command(&self.program);
        cmd.args(&self.args);

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.exec()
        }

        #[cfg(not(unix))]
        {
            match cmd.spawn() {
                Ok(_) => std::process::exit(0),
                Err(e) => e,
            }
        }
    }
}
