use std::fmt;

/// An email address as supplied by the caller.
///
/// The value is opaque: it is neither normalized nor checked for a
/// particular format, and two addresses are the same subscriber only when
/// the strings are byte-for-byte equal. A new subscriber must not be the
/// empty string; lookups of an existing one accept any string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriberEmail(String);

impl SubscriberEmail {
    pub fn parse(s: String) -> Result<Self, String> {
        if s.is_empty() {
            Err("Email is required.".to_string())
        } else {
            Ok(Self(s))
        }
    }

    /// Wraps an address that is only looked up, never stored. Nothing is
    /// rejected: an address that was never subscribed simply misses.
    pub fn lookup(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for SubscriberEmail {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriberEmail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
