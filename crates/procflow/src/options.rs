//! Command launch options
//!
//! A `Shell` carries one of these as its defaults; `run`/`try_attach` layer
//! a per-call configuration closure on top of a copy. Mutators are kept in
//! ordered lists and replayed in registration order, so later registrations
//! can see (and override) what earlier ones did.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use encoding_rs::Encoding;
use tokio_util::sync::CancellationToken;

use crate::command::Command;
use crate::syntax::CommandLineSyntax;

type StartInfoMutator = Arc<dyn Fn(&mut tokio::process::Command) + Send + Sync>;
type CommandMutator = Arc<dyn Fn(Command) -> Command + Send + Sync>;

/// Options applied when materializing a command.
#[derive(Clone, Default)]
pub struct Options {
    start_info_mutators: Vec<StartInfoMutator>,
    command_mutators: Vec<CommandMutator>,
    throw_on_error: bool,
    dispose_on_exit: Option<bool>,
    timeout: Option<Duration>,
    encoding: Option<&'static Encoding>,
    cancellation: Option<CancellationToken>,
    syntax: CommandLineSyntax,
}

impl Options {
    /// Initial working directory for the child.
    pub fn working_directory(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        let path = path.into();
        self.start_info(move |start| {
            start.current_dir(&path);
        })
    }

    /// Sets one environment variable for the child.
    pub fn environment_variable(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        let (key, value) = (key.into(), value.into());
        self.start_info(move |start| {
            start.env(&key, &value);
        })
    }

    /// Sets a batch of environment variables for the child.
    pub fn environment_variables<I, K, V>(&mut self, vars: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.start_info(move |start| {
            start.envs(&vars);
        })
    }

    /// Registers an arbitrary mutation of the launch info, run at spawn
    /// time after every previously registered mutator.
    pub fn start_info<F>(&mut self, mutator: F) -> &mut Self
    where
        F: Fn(&mut tokio::process::Command) + Send + Sync + 'static,
    {
        self.start_info_mutators.push(Arc::new(mutator));
        self
    }

    /// Registers a post-creation projection of the command. The projection
    /// may return the command unchanged, a mutated version of it, or a
    /// decorated replacement.
    pub fn command<F>(&mut self, mutator: F) -> &mut Self
    where
        F: Fn(Command) -> Command + Send + Sync + 'static,
    {
        self.command_mutators.push(Arc::new(mutator));
        self
    }

    /// When set, a non-zero exit code fails the completion future with an
    /// error-exit-code error. Off by default.
    pub fn throw_on_error(&mut self, value: bool) -> &mut Self {
        self.throw_on_error = value;
        self
    }

    /// When set (the default), the process handle is released as part of
    /// completion and [`Command::process`] is denied.
    ///
    /// [`Command::process`]: crate::Command::process
    pub fn dispose_on_exit(&mut self, value: bool) -> &mut Self {
        self.dispose_on_exit = Some(value);
        self
    }

    /// Kills the process and fails the completion future with a timeout
    /// error once `timeout` elapses. Infinite by default.
    pub fn timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = Some(timeout);
        self
    }

    /// Text encoding for the child's stdio streams. Defaults to UTF-8.
    pub fn encoding(&mut self, encoding: &'static Encoding) -> &mut Self {
        self.encoding = Some(encoding);
        self
    }

    /// External cancellation: when the token fires, the process is killed
    /// and the completion future fails as cancelled.
    pub fn cancellation_token(&mut self, token: CancellationToken) -> &mut Self {
        self.cancellation = Some(token);
        self
    }

    /// Command-line rendering strategy. Platform-native by default.
    pub fn syntax(&mut self, syntax: CommandLineSyntax) -> &mut Self {
        self.syntax = syntax;
        self
    }

    pub(crate) fn apply_start_info(&self, start: &mut tokio::process::Command) {
        for mutator in &self.start_info_mutators {
            mutator(start);
        }
    }

    pub(crate) fn apply_command_mutators(&self, mut command: Command) -> Command {
        for mutator in &self.command_mutators {
            command = mutator(command);
        }
        command
    }

    /// True when any option incompatible with attach-by-pid is present:
    /// attach has no launch info to mutate and no streams to re-encode.
    pub(crate) fn customizes_startup(&self) -> bool {
        !self.start_info_mutators.is_empty() || self.encoding.is_some()
    }

    pub(crate) fn throw_on_error_value(&self) -> bool {
        self.throw_on_error
    }

    pub(crate) fn dispose_on_exit_value(&self) -> bool {
        self.dispose_on_exit.unwrap_or(true)
    }

    pub(crate) fn timeout_value(&self) -> Option<Duration> {
        self.timeout
    }

    pub(crate) fn encoding_value(&self) -> &'static Encoding {
        self.encoding.unwrap_or(encoding_rs::UTF_8)
    }

    pub(crate) fn cancellation_value(&self) -> Option<CancellationToken> {
        self.cancellation.clone()
    }

    pub(crate) fn syntax_value(&self) -> CommandLineSyntax {
        self.syntax
    }
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("start_info_mutators", &self.start_info_mutators.len())
            .field("command_mutators", &self.command_mutators.len())
            .field("throw_on_error", &self.throw_on_error)
            .field("dispose_on_exit", &self.dispose_on_exit_value())
            .field("timeout", &self.timeout)
            .field("syntax", &self.syntax)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutators_replay_in_registration_order() {
        let mut options = Options::default();
        options
            .environment_variable("KEY", "first")
            .environment_variable("KEY", "second");
        let mut start = tokio::process::Command::new("true");
        options.apply_start_info(&mut start);
        let values: Vec<_> = start
            .as_std()
            .get_envs()
            .filter(|(k, _)| *k == "KEY")
            .collect();
        // The later registration wins because it runs last.
        assert_eq!(values.last().and_then(|(_, v)| *v).unwrap(), "second");
    }

    #[test]
    fn attach_incompatibility_tracks_startup_options() {
        let mut options = Options::default();
        assert!(!options.customizes_startup());
        options.timeout(Duration::from_secs(1));
        assert!(!options.customizes_startup());
        options.working_directory("/tmp");
        assert!(options.customizes_startup());

        let mut encoded = Options::default();
        encoded.encoding(encoding_rs::UTF_8);
        assert!(encoded.customizes_startup());
    }

    #[test]
    fn defaults_match_the_documented_table() {
        let options = Options::default();
        assert!(!options.throw_on_error_value());
        assert!(options.dispose_on_exit_value());
        assert_eq!(options.timeout_value(), None);
        assert!(options.cancellation_value().is_none());
        assert_eq!(options.syntax_value(), CommandLineSyntax::Platform);
    }
}
