use std::fmt;

/// Provider-assigned session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// Provider-assigned handle of an object within an open session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectHandle(pub u64);

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "object#{}", self.0)
    }
}

/// Session policy requested when opening a token session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoginMode {
    /// Public session; private objects stay invisible
    Public,
    /// Log in as the token user before searching
    #[default]
    User,
}

/// Operation mode bits supplied at import; carried through untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ImportFlags(pub u32);

impl ImportFlags {
    pub const NONE: ImportFlags = ImportFlags(0);

    pub fn bits(self) -> u32 {
        self.0
    }
}

/// Options for importing a key from a locator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyOptions {
    /// Flags stored on the handle
    pub flags: ImportFlags,
    /// Session policy for discovery and rediscovery
    pub login: LoginMode,
}

impl Default for KeyOptions {
    fn default() -> Self {
        Self {
            flags: ImportFlags::NONE,
            login: LoginMode::User,
        }
    }
}
