use smol_str::SmolStr;
use std::fmt;

/// SIP request methods this stack deals in.
///
/// Extension methods parse into `Unknown` so an in-dialog request we do not
/// support can still be answered with 405.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Invite,
    Ack,
    Bye,
    Cancel,
    Options,
    Register,
    Unknown(SmolStr),
}

impl Method {
    /// Returns the canonical uppercase token for this method.
    pub fn as_str(&self) -> &str {
        match self {
            Method::Invite => "INVITE",
            Method::Ack => "ACK",
            Method::Bye => "BYE",
            Method::Cancel => "CANCEL",
            Method::Options => "OPTIONS",
            Method::Register => "REGISTER",
            Method::Unknown(token) => token.as_str(),
        }
    }

    /// Parses a method token, returning `Unknown` for extension methods.
    pub fn from_token(token: &str) -> Self {
        if token.eq_ignore_ascii_case("INVITE") {
            Method::Invite
        } else if token.eq_ignore_ascii_case("ACK") {
            Method::Ack
        } else if token.eq_ignore_ascii_case("BYE") {
            Method::Bye
        } else if token.eq_ignore_ascii_case("CANCEL") {
            Method::Cancel
        } else if token.eq_ignore_ascii_case("OPTIONS") {
            Method::Options
        } else if token.eq_ignore_ascii_case("REGISTER") {
            Method::Register
        } else {
            Method::Unknown(SmolStr::new(token))
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_round_trip() {
        for token in ["INVITE", "ACK", "BYE", "CANCEL", "OPTIONS", "REGISTER"] {
            assert_eq!(Method::from_token(token).as_str(), token);
        }
    }

    #[test]
    fn parsing_is_case_insensitive() {
        assert_eq!(Method::from_token("invite"), Method::Invite);
        assert_eq!(Method::from_token("Bye"), Method::Bye);
    }

    #[test]
    fn extension_methods_survive() {
        let m = Method::from_token("SUBSCRIBE");
        assert_eq!(m, Method::Unknown(SmolStr::new("SUBSCRIBE")));
        assert_eq!(m.as_str(), "SUBSCRIBE");
    }
}
