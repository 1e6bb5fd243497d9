//! The MariaDB GTID triplet: `domain-server_id-sequence`, with an optional
//! `:event_num` suffix used by this converter to pin a sub-event position
//! within a transaction.

use std::fmt;
use std::str::FromStr;

use crate::error::ConverterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Gtid {
    pub domain: u32,
    pub server_id: u32,
    pub sequence: u64,
    pub event_num: u32,
}

impl Gtid {
    pub fn new(domain: u32, server_id: u32, sequence: u64) -> Self {
        Gtid {
            domain,
            server_id,
            sequence,
            event_num: 0,
        }
    }

    /// `true` if `other` cannot legally follow `self` within the same
    /// `(domain, server_id)` stream (§3 GTID monotonicity invariant).
    pub fn is_regression(&self, other: &Gtid) -> bool {
        self.domain == other.domain
            && self.server_id == other.server_id
            && other.sequence < self.sequence
    }
}

impl fmt::Display for Gtid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}:{}",
            self.domain, self.server_id, self.sequence, self.event_num
        )
    }
}

impl FromStr for Gtid {
    type Err = ConverterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (triplet, event_num) = match s.split_once(':') {
            Some((t, e)) => (
                t,
                e.parse::<u32>()
                    .map_err(|_| ConverterError::Format(format!("bad event_num in gtid {s}")))?,
            ),
            None => (s, 0),
        };
        let mut parts = triplet.splitn(3, '-');
        let domain = parts
            .next()
            .ok_or_else(|| ConverterError::Format(format!("malformed gtid {s}")))?
            .parse::<u32>()
            .map_err(|_| ConverterError::Format(format!("bad domain in gtid {s}")))?;
        let server_id = parts
            .next()
            .ok_or_else(|| ConverterError::Format(format!("malformed gtid {s}")))?
            .parse::<u32>()
            .map_err(|_| ConverterError::Format(format!("bad server_id in gtid {s}")))?;
        let sequence = parts
            .next()
            .ok_or_else(|| ConverterError::Format(format!("malformed gtid {s}")))?
            .parse::<u64>()
            .map_err(|_| ConverterError::Format(format!("bad sequence in gtid {s}")))?;
        Ok(Gtid {
            domain,
            server_id,
            sequence,
            event_num,
        })
    }
}
