use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use tokio::process::{Child, Command};

use crate::config::ElevationSection;

/// A launched child this process can observe and stop.
#[async_trait]
pub trait ChildProcess: Send {
    /// The exit code if the child has already exited.
    fn try_exit_code(&mut self) -> io::Result<Option<i32>>;

    async fn wait(&mut self) -> io::Result<i32>;

    async fn kill(&mut self) -> io::Result<()>;
}

/// Which elevated context a relaunch runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// The TrustedInstaller service account.
    TrustedInstaller,
    /// The current administrator token.
    Elevated,
}

/// Relaunches this executable under a given context.
pub trait Launcher: Send + Sync {
    fn launch(&self, mode: LaunchMode, args: &[String]) -> io::Result<Box<dyn ChildProcess>>;
}

/// Starts the program through a configured launcher prefix.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    program: PathBuf,
    trusted_installer: Vec<String>,
    elevated: Vec<String>,
}

impl CommandLauncher {
    pub fn new(program: PathBuf, section: &ElevationSection) -> Self {
        Self {
            program,
            trusted_installer: section.trusted_installer_launcher.clone(),
            elevated: section.elevated_launcher.clone(),
        }
    }

    /// Launcher for the running executable.
    pub fn current_exe(section: &ElevationSection) -> io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?, section))
    }

    fn command(&self, mode: LaunchMode, args: &[String]) -> Command {
        let prefix = match mode {
            LaunchMode::TrustedInstaller => &self.trusted_installer,
            LaunchMode::Elevated => &self.elevated,
        };

        let mut cmd = match prefix.split_first() {
            Some((launcher, launcher_args)) => {
                let mut cmd = Command::new(launcher);
                cmd.args(launcher_args).arg(&self.program);
                cmd
            }
            None => Command::new(&self.program),
        };
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

impl Launcher for CommandLauncher {
    fn launch(&self, mode: LaunchMode, args: &[String]) -> io::Result<Box<dyn ChildProcess>> {
        let mut cmd = self.command(mode, args);
        tracing::debug!(?mode, ?cmd, "launching child");
        let child = cmd.spawn()?;
        Ok(Box::new(TokioChild(child)))
    }
}

struct TokioChild(Child);

fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[async_trait]
impl ChildProcess for TokioChild {
    fn try_exit_code(&mut self) -> io::Result<Option<i32>> {
        Ok(self.0.try_wait()?.map(exit_code))
    }

    async fn wait(&mut self) -> io::Result<i32> {
        Ok(exit_code(self.0.wait().await?))
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.0.kill().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(ti: &[&str], elevated: &[&str]) -> ElevationSection {
        ElevationSection {
            trusted_installer_launcher: ti.iter().map(|s| s.to_string()).collect(),
            elevated_launcher: elevated.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn argv(cmd: &Command) -> Vec<String> {
        let std = cmd.as_std();
        std::iter::once(std.get_program())
            .chain(std.get_args())
            .map(|s| s.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn trusted_installer_uses_the_launcher_prefix() {
        let launcher = CommandLauncher::new(
            PathBuf::from("tiered"),
            &section(&["NSudoLC.exe", "-U:T"], &[]),
        );
        let cmd = launcher.command(
            LaunchMode::TrustedInstaller,
            &["run".to_string(), "pb".to_string()],
        );
        assert_eq!(argv(&cmd), vec!["NSudoLC.exe", "-U:T", "tiered", "run", "pb"]);
    }

    #[test]
    fn empty_prefix_runs_the_program_directly() {
        let launcher = CommandLauncher::new(PathBuf::from("tiered"), &section(&["x"], &[]));
        let cmd = launcher.command(LaunchMode::Elevated, &["disable-protection".to_string()]);
        assert_eq!(argv(&cmd), vec!["tiered", "disable-protection"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn tokio_child_reports_exit_code() {
        let launcher = CommandLauncher::new(PathBuf::from("sh"), &section(&[], &[]));
        let mut child = launcher
            .launch(LaunchMode::Elevated, &["-c".to_string(), "exit 4".to_string()])
            .unwrap();
        assert_eq!(child.wait().await.unwrap(), 4);
        assert_eq!(child.try_exit_code().unwrap(), Some(4));
    }
}
