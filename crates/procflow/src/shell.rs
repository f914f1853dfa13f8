//! Shell: option-carrying command factory

use tracing::debug;

use crate::command::{AttachedCommand, Command, ProcessCommand};
use crate::error::Result;
use crate::options::Options;

/// Factory for commands, carrying default options.
///
/// Per-call configuration is layered over a copy of the defaults; the shell
/// itself never changes after construction.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use procflow::Shell;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let shell = Shell::new(|options| {
///     options.timeout(Duration::from_secs(30)).throw_on_error(true);
/// });
/// let mut command = shell.run("echo", ["hello"])?;
/// let result = command.wait().await?;
/// assert_eq!(result.standard_output().await?, "hello\n");
/// # Ok(())
/// # }
/// ```
pub struct Shell {
    options: Options,
}

impl Shell {
    /// A shell whose defaults are built by `configure`.
    pub fn new(configure: impl FnOnce(&mut Options)) -> Self {
        let mut options = Options::default();
        configure(&mut options);
        Self { options }
    }

    /// The default options commands inherit.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Launches `program` with `arguments` under this shell's defaults.
    pub fn run<I, S>(&self, program: impl Into<String>, arguments: I) -> Result<Command>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.run_with(program, arguments, |_| {})
    }

    /// Launches `program`, layering `configure` over the shell defaults.
    pub fn run_with<I, S>(
        &self,
        program: impl Into<String>,
        arguments: I,
        configure: impl FnOnce(&mut Options),
    ) -> Result<Command>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut options = self.options.clone();
        configure(&mut options);
        let program = program.into();
        let arguments: Vec<String> = arguments.into_iter().map(Into::into).collect();
        let process = ProcessCommand::spawn(program, arguments, &options)?;
        let command = Command::from_process(process);
        Ok(options.apply_command_mutators(command))
    }

    /// Attaches to an already-running process by pid.
    ///
    /// Returns `Ok(None)` when the pid does not name a live process. Fails
    /// with a precondition error when the effective options carry
    /// launch-time customization (encoding or start-info mutators), which
    /// attach cannot honor.
    pub fn try_attach(&self, pid: u32) -> Result<Option<Command>> {
        self.try_attach_with(pid, |_| {})
    }

    /// [`try_attach`](Shell::try_attach) with per-call options.
    pub fn try_attach_with(
        &self,
        pid: u32,
        configure: impl FnOnce(&mut Options),
    ) -> Result<Option<Command>> {
        let mut options = self.options.clone();
        configure(&mut options);
        let Some(attached) = AttachedCommand::try_attach(pid, &options)? else {
            debug!(pid = %pid, "attach failed: no such process");
            return Ok(None);
        };
        let command = Command::from_attached(attached);
        Ok(Some(options.apply_command_mutators(command)))
    }
}

impl Default for Shell {
    fn default() -> Self {
        Self::new(|_| {})
    }
}
