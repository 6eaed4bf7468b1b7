use crate::error::LinkError;
use std::{fmt, str::FromStr};

/// Step a ticket has reached in its verification flow
///
/// Stored using the legacy string encoding so existing entries stay readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    VerifyAccount,
    SendEmail,
    VerifyCaptcha,
    Success,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::VerifyAccount => "VERIFY_ACCOUNT",
            Phase::SendEmail => "SEND_EMAIL",
            Phase::VerifyCaptcha => "VERIFY_CAPTCHA",
            Phase::Success => "SUCCESS",
        }
    }

    /// Numeric step, 0 through 3
    pub fn step(&self) -> u8 {
        match self {
            Phase::VerifyAccount => 0,
            Phase::SendEmail => 1,
            Phase::VerifyCaptcha => 2,
            Phase::Success => 3,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "VERIFY_ACCOUNT" => Ok(Phase::VerifyAccount),
            "SEND_EMAIL" => Ok(Phase::SendEmail),
            "VERIFY_CAPTCHA" => Ok(Phase::VerifyCaptcha),
            "SUCCESS" => Ok(Phase::Success),
            _ => Err(LinkError::PhaseError),
        }
    }
}
