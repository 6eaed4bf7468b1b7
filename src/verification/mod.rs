/// Verification flow vocabulary and durable phase state
///
/// Register, login and reset-password flows share one phase vocabulary. The
/// flow a ticket belongs to is carried by the purpose signed into the ticket,
/// not by a separate state field.
mod phase;
mod store;

pub use phase::Phase;
pub use store::PhaseStore;

use crate::{
    credential::Purpose,
    error::{LinkError, LinkResult},
};
use rand::Rng;
use std::str::FromStr;
use std::time::Duration;

/// Lifetime of a stored verify code
pub const VERIFY_CODE_TTL: Duration = Duration::from_secs(3 * 60);

/// Mixed-case alphabet without look-alike characters (0/O, 1/l/I)
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnpqrstuvwxyz23456789";
const CODE_LEN: usize = 5;
const CODE_PREFIX: &str = "S-";

/// Which flow a verification request belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowFlag {
    Register,
    Login,
    ResetPassword,
}

impl FlowFlag {
    /// Purpose signed into tickets of this flow
    pub fn purpose(&self) -> Purpose {
        match self {
            FlowFlag::Register => Purpose::RegisterTicket,
            FlowFlag::Login => Purpose::LoginTicket,
            FlowFlag::ResetPassword => Purpose::ResetPasswordTicket,
        }
    }

    /// Lifetime of tickets (and of their phase record) in this flow
    pub fn ticket_ttl(&self) -> Duration {
        match self {
            FlowFlag::Register | FlowFlag::Login => Duration::from_secs(5 * 60),
            FlowFlag::ResetPassword => Duration::from_secs(6 * 60),
        }
    }

    /// Cookie the ticket is handed out in
    pub fn cookie_name(&self) -> &'static str {
        match self {
            FlowFlag::Register => "REGISTER-TICKET",
            FlowFlag::Login => "LOGIN-TICKET",
            FlowFlag::ResetPassword => "RESET-PASSWORD-TICKET",
        }
    }

    /// Key of the ticket in JSON responses
    pub fn response_key(&self) -> &'static str {
        match self {
            FlowFlag::Register => "registerTicket",
            FlowFlag::Login => "loginTicket",
            FlowFlag::ResetPassword => "resetPwdTicket",
        }
    }

    /// Flow whose tickets carry `purpose`
    pub fn from_purpose(purpose: Purpose) -> Option<Self> {
        match purpose {
            Purpose::RegisterTicket => Some(FlowFlag::Register),
            Purpose::LoginTicket => Some(FlowFlag::Login),
            Purpose::ResetPasswordTicket => Some(FlowFlag::ResetPassword),
            _ => None,
        }
    }
}

impl FromStr for FlowFlag {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "0" => Ok(FlowFlag::Register),
            "1" => Ok(FlowFlag::Login),
            "2" => Ok(FlowFlag::ResetPassword),
            other => Err(LinkError::InvalidInput(format!("Invalid flag: {}", other))),
        }
    }
}

/// Generate a human-readable verify code such as `S-aB3xY`
pub fn generate_verify_code() -> String {
    let mut rng = rand::thread_rng();
    let body: String = (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect();
    format!("{}{}", CODE_PREFIX, body)
}

/// Normalize a submitted code; the `S-` prefix is optional on input
pub fn normalize_verify_code(submitted: &str) -> String {
    let trimmed = submitted.trim();
    if trimmed.starts_with(CODE_PREFIX) {
        trimmed.to_string()
    } else {
        format!("{}{}", CODE_PREFIX, trimmed)
    }
}
