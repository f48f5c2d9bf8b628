//! Wait strategy variants and their parameters.

use std::ops::RangeInclusive;

use regex::Regex;

use crate::ports::PortMap;

/// Three-way classification of one readiness probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// The condition is satisfied.
    Ready,
    /// Not satisfied yet; keep polling until the deadline.
    Pending,
    /// The condition can never be satisfied; stop polling.
    Failed(String),
}

/// The thing being polled: a running container plus its resolved
/// connection metadata. Immutable once polling starts.
#[derive(Debug, Clone)]
pub struct WaitTarget {
    /// Engine-assigned container identifier.
    pub container_id: String,
    /// Host address published ports are reachable on.
    pub host: String,
    /// Resolved bindings for the container's declared ports.
    pub ports: PortMap,
}

impl WaitTarget {
    /// Build a target from resolved parts.
    pub fn new(container_id: impl Into<String>, host: impl Into<String>, ports: PortMap) -> Self {
        Self {
            container_id: container_id.into(),
            host: host.into(),
            ports,
        }
    }
}

/// Wait for a pattern to appear in the container's log output.
#[derive(Debug, Clone)]
pub struct LogPatternWait {
    /// Pattern to search accumulated output for.
    pub pattern: Regex,
    /// Number of matches required before the target counts as ready.
    pub times: usize,
}

impl LogPatternWait {
    /// Compile a pattern; ready after one match.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            times: 1,
        })
    }

    /// Require the pattern to match at least `times` times.
    pub fn times(mut self, times: usize) -> Self {
        self.times = times;
        self
    }
}

/// Wait for TCP connections to resolved ports to succeed.
///
/// An empty port list checks every resolved binding on the target.
/// Connection refusal is "not yet ready", never a permanent failure: the
/// process may not have opened its listener yet.
#[derive(Debug, Clone, Default)]
pub struct PortsWait {
    /// Container-internal ports to check; empty means all resolved ports.
    pub ports: Vec<u16>,
}

impl PortsWait {
    /// Check every resolved port.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the check to one internal port (repeatable).
    pub fn port(mut self, port: u16) -> Self {
        self.ports.push(port);
        self
    }
}

/// What to do when an HTTP probe gets a response outside the accepted
/// status range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusPolicy {
    /// Keep polling until the deadline (availability-favoring default).
    #[default]
    Retry,
    /// Treat the status as a permanent failure.
    Fail,
}

/// Wait for an HTTP response with an accepted status.
#[derive(Debug, Clone)]
pub struct HttpWait {
    /// Request path, e.g. `/health`.
    pub path: String,
    /// Container-internal port the service listens on.
    pub port: u16,
    /// Statuses that count as ready.
    pub accept_status: RangeInclusive<u16>,
    /// Handling of responses outside `accept_status`.
    pub on_unexpected_status: StatusPolicy,
}

impl HttpWait {
    /// Probe `path` on `port`; any 2xx–3xx response counts as ready.
    pub fn new(path: &str, port: u16) -> Self {
        Self {
            path: path.to_string(),
            port,
            accept_status: 200..=399,
            on_unexpected_status: StatusPolicy::Retry,
        }
    }

    /// Accept only the given status range.
    pub fn accept_status(mut self, range: RangeInclusive<u16>) -> Self {
        self.accept_status = range;
        self
    }

    /// Treat any non-accepted status as a permanent failure.
    pub fn fail_on_unexpected_status(mut self) -> Self {
        self.on_unexpected_status = StatusPolicy::Fail;
        self
    }
}

/// What to do when an exec probe exits with an unexpected code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExitPolicy {
    /// Keep polling until the deadline.
    #[default]
    Retry,
    /// Treat the mismatch as a permanent failure.
    Fail,
}

/// Wait for an in-container command to exit with an expected code.
#[derive(Debug, Clone)]
pub struct ExecWait {
    /// Command argv.
    pub cmd: Vec<String>,
    /// Exit code that counts as ready.
    pub expected_exit: i64,
    /// Handling of other exit codes.
    pub on_mismatch: ExitPolicy,
}

impl ExecWait {
    /// Run `cmd`; exit code 0 counts as ready.
    pub fn new(cmd: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            cmd: cmd.into_iter().map(Into::into).collect(),
            expected_exit: 0,
            on_mismatch: ExitPolicy::Retry,
        }
    }

    /// Expect a specific exit code instead of 0.
    pub fn expected_exit(mut self, code: i64) -> Self {
        self.expected_exit = code;
        self
    }

    /// Treat any other exit code as a permanent failure.
    pub fn fail_on_mismatch(mut self) -> Self {
        self.on_mismatch = ExitPolicy::Fail;
        self
    }
}

/// Like [`ExecWait`] but for a literal shell command string, run through
/// `/bin/sh -c`.
#[derive(Debug, Clone)]
pub struct ShellWait {
    /// Shell command string.
    pub command: String,
    /// Exit code that counts as ready.
    pub expected_exit: i64,
    /// Handling of other exit codes.
    pub on_mismatch: ExitPolicy,
}

impl ShellWait {
    /// Run `command` via `/bin/sh -c`; exit code 0 counts as ready.
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            expected_exit: 0,
            on_mismatch: ExitPolicy::Retry,
        }
    }

    /// Expect a specific exit code instead of 0.
    pub fn expected_exit(mut self, code: i64) -> Self {
        self.expected_exit = code;
        self
    }

    /// Treat any other exit code as a permanent failure.
    pub fn fail_on_mismatch(mut self) -> Self {
        self.on_mismatch = ExitPolicy::Fail;
        self
    }
}

/// Declarative readiness condition for a started container.
///
/// Closed set of probe kinds; every variant classifies each poll as ready,
/// not yet, or permanently failed, and no variant can outlive the
/// absolute startup timeout enforced by the poll loop.
#[derive(Debug, Clone)]
pub enum WaitStrategy {
    /// Pattern match over accumulated log output.
    LogPattern(LogPatternWait),
    /// TCP reachability of resolved ports.
    Ports(PortsWait),
    /// HTTP response status on a resolved port.
    Http(HttpWait),
    /// Engine-reported health-check status.
    Health,
    /// Exit code of an in-container command.
    Exec(ExecWait),
    /// Exit code of an in-container shell command.
    Shell(ShellWait),
    /// All member strategies must report ready. Members share the
    /// composite's deadline and are re-evaluated each poll.
    Composite(Vec<WaitStrategy>),
}

impl WaitStrategy {
    /// Log-pattern strategy; fails on an invalid regex.
    pub fn log_pattern(pattern: &str) -> Result<Self, regex::Error> {
        Ok(WaitStrategy::LogPattern(LogPatternWait::new(pattern)?))
    }

    /// TCP reachability of every resolved port.
    pub fn ports() -> Self {
        WaitStrategy::Ports(PortsWait::new())
    }

    /// HTTP probe with the default 2xx–3xx acceptance.
    pub fn http(path: &str, port: u16) -> Self {
        WaitStrategy::Http(HttpWait::new(path, port))
    }

    /// Engine health-check strategy.
    pub fn health() -> Self {
        WaitStrategy::Health
    }

    /// Exec strategy expecting exit code 0.
    pub fn exec(cmd: impl IntoIterator<Item = impl Into<String>>) -> Self {
        WaitStrategy::Exec(ExecWait::new(cmd))
    }

    /// Shell strategy expecting exit code 0.
    pub fn shell(command: &str) -> Self {
        WaitStrategy::Shell(ShellWait::new(command))
    }

    /// Composite of several strategies, all of which must be ready.
    pub fn all_of(strategies: impl IntoIterator<Item = WaitStrategy>) -> Self {
        WaitStrategy::Composite(strategies.into_iter().collect())
    }

    /// Strategy name used in errors and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            WaitStrategy::LogPattern(_) => "log-pattern",
            WaitStrategy::Ports(_) => "ports",
            WaitStrategy::Http(_) => "http",
            WaitStrategy::Health => "health",
            WaitStrategy::Exec(_) => "exec",
            WaitStrategy::Shell(_) => "shell",
            WaitStrategy::Composite(_) => "composite",
        }
    }
}
