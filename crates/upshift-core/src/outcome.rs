use serde::Serialize;

/// Final result of one command invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandOutcome {
    Success,
    Warning,
    Error,
}

impl CommandOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    /// Exit codes follow the server's admin CLI: 0 success, 1 error, 4 warning.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Error => 1,
            Self::Warning => 4,
        }
    }

    pub fn worst(self, other: Self) -> Self {
        self.max(other)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPlatform {
    Windows,
    Posix,
}

impl HostPlatform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Posix
        }
    }

    pub fn is_windows(self) -> bool {
        self == Self::Windows
    }

    pub fn path_separator(self) -> char {
        match self {
            Self::Windows => '\\',
            Self::Posix => '/',
        }
    }
}
