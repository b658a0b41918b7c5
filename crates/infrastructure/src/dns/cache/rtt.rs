//! Round-trip-time estimator for one upstream server (RFC 6298 style,
//! millisecond resolution).

pub const RTT_MIN_TIMEOUT: i32 = 50;
pub const RTT_MAX_TIMEOUT: i32 = 120_000;
/// Timeout assumed for a server never queried before.
pub const UNKNOWN_SERVER_NICENESS: i32 = 376;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RttInfo {
    pub srtt: i32,
    pub rttvar: i32,
    pub rto: i32,
}

impl Default for RttInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl RttInfo {
    pub fn new() -> Self {
        let mut rtt = Self {
            srtt: 0,
            rttvar: UNKNOWN_SERVER_NICENESS / 4,
            rto: 0,
        };
        rtt.rto = rtt.calc_rto();
        rtt
    }

    fn calc_rto(&self) -> i32 {
        (self.srtt + 4 * self.rttvar).clamp(RTT_MIN_TIMEOUT, RTT_MAX_TIMEOUT)
    }

    pub fn timeout(&self) -> i32 {
        self.rto
    }

    /// Current timeout without the upper clamp, so backed-off servers can
    /// be told apart from merely slow ones.
    pub fn unclamped(&self) -> i32 {
        if self.calc_rto() != self.rto {
            self.rto
        } else {
            self.srtt + 4 * self.rttvar
        }
    }

    /// Timeout the estimator would give without any backoff applied.
    pub fn notimeout(&self) -> i32 {
        self.calc_rto()
    }

    pub fn update(&mut self, ms: i32) {
        let mut delta = ms - self.srtt;
        self.srtt += delta / 8;
        if delta < 0 {
            delta = -delta;
        }
        self.rttvar += (delta - self.rttvar) / 4;
        self.rto = self.calc_rto();
    }

    /// Exponential backoff after a timeout of a query sent with timeout
    /// `orig`. Doubles `orig`, not the current value, so many queries
    /// timing out together back off only once.
    pub fn lost(&mut self, orig: i32) {
        if self.rto < orig {
            return;
        }
        let doubled = orig.saturating_mul(2);
        if self.rto <= doubled {
            self.rto = doubled.min(RTT_MAX_TIMEOUT);
        }
    }
}
