//! Feed Login and Subscription Commands
//!
//! The upstream feed expects, immediately after the TCP handshake, three
//! newline-terminated lines in order: an opaque authentication token, a
//! username, and a password. Quote subscriptions follow as `sqt <TICKER>`
//! commands. This module only formats those lines; the handshake semantics
//! live upstream.

/// Feed credentials.
///
/// `Debug` redacts both secret values.
#[derive(Clone)]
pub struct Credentials {
    token: String,
    username: String,
    password: String,
}

impl Credentials {
    /// Create credentials from their three components.
    #[must_use]
    pub const fn new(token: String, username: String, password: String) -> Self {
        Self {
            token,
            username,
            password,
        }
    }

    /// The three login lines, in the order the server expects them.
    #[must_use]
    pub fn login_lines(&self) -> String {
        format!("{}\n{}\n{}\n", self.token, self.username, self.password)
    }

    /// Username, for log context.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"[REDACTED]")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Format one quote subscription command.
#[must_use]
pub fn subscribe_command(ticker: &str) -> String {
    format!("sqt {ticker}\n")
}
