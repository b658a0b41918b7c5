use std::fmt;
use std::str::FromStr;

/// DNSSEC validation outcome of an RRset or a whole reply.
///
/// Ordered so that a higher value is a stronger statement: an update may
/// only raise the status of cached data, never lower it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum SecurityStatus {
    #[default]
    Unchecked = 0,
    Bogus = 1,
    Indeterminate = 2,
    Insecure = 3,
    Secure = 4,
}

impl SecurityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unchecked => "Unchecked",
            Self::Bogus => "Bogus",
            Self::Indeterminate => "Indeterminate",
            Self::Insecure => "Insecure",
            Self::Secure => "Secure",
        }
    }

    pub fn is_bogus(&self) -> bool {
        matches!(self, Self::Bogus)
    }
}

impl FromStr for SecurityStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Secure" => Self::Secure,
            "Insecure" => Self::Insecure,
            "Bogus" => Self::Bogus,
            "Indeterminate" => Self::Indeterminate,
            _ => Self::Unchecked,
        })
    }
}

impl fmt::Display for SecurityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much the resolver believes an RRset, from the section it was found
/// in and the authority of the server that sent it (RFC 2181 section 5.4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum RrsetTrust {
    #[default]
    None = 0,
    AdditionalNoAa,
    AuthorityNoAa,
    AdditionalAa,
    NonAuthAnswerAa,
    AnswerNoAa,
    Glue,
    AuthorityAa,
    AnswerAa,
    SecureNoGlue,
    PrimingNoGlue,
    Validated,
    Ultimate,
}

/// Response code of a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Rcode {
    #[default]
    NoError = 0,
    FormErr = 1,
    ServFail = 2,
    NxDomain = 3,
    NotImp = 4,
    Refused = 5,
}

impl Rcode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::NoError),
            1 => Some(Self::FormErr),
            2 => Some(Self::ServFail),
            3 => Some(Self::NxDomain),
            4 => Some(Self::NotImp),
            5 => Some(Self::Refused),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoError => "NOERROR",
            Self::FormErr => "FORMERR",
            Self::ServFail => "SERVFAIL",
            Self::NxDomain => "NXDOMAIN",
            Self::NotImp => "NOTIMP",
            Self::Refused => "REFUSED",
        }
    }
}

impl fmt::Display for Rcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_security_order() {
        assert!(SecurityStatus::Secure > SecurityStatus::Insecure);
        assert!(SecurityStatus::Bogus > SecurityStatus::Unchecked);
        assert!(SecurityStatus::Bogus < SecurityStatus::Indeterminate);
    }

    #[test]
    fn test_trust_order_answer_beats_glue() {
        assert!(RrsetTrust::AnswerAa > RrsetTrust::Glue);
        assert!(RrsetTrust::Validated > RrsetTrust::AnswerAa);
        assert!(RrsetTrust::AdditionalNoAa > RrsetTrust::None);
    }

    #[test]
    fn test_rcode_codes() {
        assert_eq!(Rcode::from_u8(2), Some(Rcode::ServFail));
        assert_eq!(Rcode::from_u8(9), None);
        assert_eq!(Rcode::NxDomain.as_u8(), 3);
    }
}
