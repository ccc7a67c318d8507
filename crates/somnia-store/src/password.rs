use std::sync::RwLock;

use zeroize::Zeroizing;

/// Source of the session's encryption settings.
///
/// The storage core only asks; it never persists the password.
pub trait PasswordProvider: Send + Sync {
    /// Whether designated collections are written encrypted.
    fn encryption_enabled(&self) -> bool;

    /// The session password, if the user has entered one.
    fn encryption_password(&self) -> Option<String>;
}

#[derive(Default)]
struct SessionState {
    enabled: bool,
    password: Option<Zeroizing<String>>,
}

/// In-process password provider holding the session password in memory.
#[derive(Default)]
pub struct SessionPassword {
    state: RwLock<SessionState>,
}

impl SessionPassword {
    pub fn new(enabled: bool) -> Self {
        Self {
            state: RwLock::new(SessionState {
                enabled,
                password: None,
            }),
        }
    }

    pub fn set_password(&self, password: &str) {
        self.state.write().expect("lock poisoned").password = Some(Zeroizing::new(password.to_owned()));
    }

    pub fn clear_password(&self) {
        self.state.write().expect("lock poisoned").password = None;
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.state.write().expect("lock poisoned").enabled = enabled;
    }

    pub fn has_password(&self) -> bool {
        self.state.read().expect("lock poisoned").password.is_some()
    }
}

impl PasswordProvider for SessionPassword {
    fn encryption_enabled(&self) -> bool {
        self.state.read().expect("lock poisoned").enabled
    }

    fn encryption_password(&self) -> Option<String> {
        self.state
            .read()
            .expect("lock poisoned")
            .password
            .as_ref()
            .map(|p| p.as_str().to_owned())
    }
}

impl std::fmt::Debug for SessionPassword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read().expect("lock poisoned");
        f.debug_struct("SessionPassword")
            .field("enabled", &state.enabled)
            .field("password", &state.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
