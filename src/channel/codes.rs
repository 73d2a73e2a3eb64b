//! Decoders for `+CME ERROR:` and `+CMS ERROR:` final responses
//!
//! Both assume numeric error reporting (`AT+CMEE=1`).

use super::command::Response;

/// Mobile equipment error (3GPP TS 27.007, clause 9.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmeError {
    /// The command succeeded
    Success,
    /// The final line is not a CME error
    NonCme,
    PhoneFailure,
    OperationNotAllowed,
    OperationNotSupported,
    PhSimPinRequired,
    SimNotInserted,
    SimPinRequired,
    SimPukRequired,
    SimFailure,
    SimBusy,
    SimWrong,
    IncorrectPassword,
    SimPin2Required,
    SimPuk2Required,
    MemoryFull,
    NotFound,
    NoNetworkService,
    NetworkTimeout,
    NetworkNotAllowed,
    Unknown,
    /// Any other numeric code
    Other(i32),
}

impl CmeError {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::PhoneFailure,
            3 => Self::OperationNotAllowed,
            4 => Self::OperationNotSupported,
            5 => Self::PhSimPinRequired,
            10 => Self::SimNotInserted,
            11 => Self::SimPinRequired,
            12 => Self::SimPukRequired,
            13 => Self::SimFailure,
            14 => Self::SimBusy,
            15 => Self::SimWrong,
            16 => Self::IncorrectPassword,
            17 => Self::SimPin2Required,
            18 => Self::SimPuk2Required,
            20 => Self::MemoryFull,
            22 => Self::NotFound,
            30 => Self::NoNetworkService,
            31 => Self::NetworkTimeout,
            32 => Self::NetworkNotAllowed,
            100 => Self::Unknown,
            other => Self::Other(other),
        }
    }
}

/// Message service error (3GPP TS 27.005, clause 3.2.5)
///
/// Only the codes callers act on are kept; everything else is `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmsError {
    Success,
    NonCms,
    MemoryFull,
    NoNetworkService,
    NetworkTimeout,
    /// Destination barred by fixed dialing
    FdnFailure,
    Unknown,
}

pub const CMS_MEMORY_FULL: i32 = 322;
pub const CMS_NO_NETWORK_SERVICE: i32 = 331;
pub const CMS_NETWORK_TIMEOUT: i32 = 332;
/// Vendor-specific (manufacturer range 512..)
pub const CMS_FDN_FAILURE: i32 = 531;

impl CmsError {
    pub fn from_code(code: i32) -> Self {
        match code {
            CMS_MEMORY_FULL => Self::MemoryFull,
            CMS_NO_NETWORK_SERVICE => Self::NoNetworkService,
            CMS_NETWORK_TIMEOUT => Self::NetworkTimeout,
            CMS_FDN_FAILURE => Self::FdnFailure,
            _ => Self::Unknown,
        }
    }
}

/// CME error carried by `response` (`+CCHC ERROR:` counts too)
pub fn cme_error(response: &Response) -> CmeError {
    if response.success {
        return CmeError::Success;
    }
    response
        .final_line
        .as_deref()
        .filter(|l| l.starts_with("+CME ERROR:") || l.starts_with("+CCHC ERROR:"))
        .and_then(error_code)
        .map_or(CmeError::NonCme, CmeError::from_code)
}

/// CMS error carried by `response`
pub fn cms_error(response: &Response) -> CmsError {
    if response.success {
        return CmsError::Success;
    }
    response
        .final_line
        .as_deref()
        .filter(|l| l.starts_with("+CMS ERROR:"))
        .and_then(error_code)
        .map_or(CmsError::NonCms, CmsError::from_code)
}

/// Leading integer of the first field after the `:`
fn error_code(line: &str) -> Option<i32> {
    let (_, rest) = line.split_once(':')?;
    let field = rest.split(',').next()?.trim_start();
    let sign_len = usize::from(field.starts_with(['-', '+']));
    let digits = field[sign_len..]
        .bytes()
        .take_while(u8::is_ascii_digit)
        .count();
    if digits == 0 {
        return None;
    }
    field[..sign_len + digits].parse().ok()
}
