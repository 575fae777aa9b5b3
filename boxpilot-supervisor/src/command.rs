use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, Command};

use boxpilot_core::paths;

use crate::error::SupervisorError;

/// `CREATE_NO_WINDOW` process creation flag.
#[cfg_attr(not(windows), allow(dead_code))]
pub(crate) const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// The kernel invocation: program, arguments, working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub working_dir: Option<PathBuf>,
}

impl KernelCommand {
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            working_dir: None,
        }
    }

    /// `<kernel_dir>/sing-box run -D <kernel_dir>`.
    pub fn sing_box(home: &Path) -> Self {
        let dir = paths::kernel_dir(home);
        let mut command = Self::new(
            paths::kernel_binary(home),
            [OsString::from("run"), OsString::from("-D"), dir.clone().into_os_string()],
        );
        command.working_dir = Some(dir);
        command
    }

    pub fn display(&self) -> String {
        self.program.display().to_string()
    }

    /// Spawn with stdio inherited. The child is killed if its handle is
    /// dropped without an explicit stop.
    pub(crate) fn spawn(&self) -> Result<Child, SupervisorError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);

        cmd.spawn().map_err(|source| SupervisorError::Spawn {
            program: self.display(),
            source,
        })
    }
}
