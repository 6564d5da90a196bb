//! Elevation Bootstrapper.
//!
//! Relaunching this executable in higher security contexts, either as
//! TrustedInstaller with its output relayed back, or as an elevated
//! Administrator to turn antivirus protection off.

mod cascade;
mod launcher;
mod protection;
mod trusted;

pub use cascade::{disable_in_child, prepare_system};
pub use launcher::{ChildProcess, CommandLauncher, LaunchMode, Launcher};
pub use protection::{DefenderService, ProtectionService};
pub use trusted::TrustedInstallerSession;
