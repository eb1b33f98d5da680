// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present REMUX Contributors

//! Congestion-feedback policies
//!
//! Receiver-side window arithmetic driven by explicit congestion marks.
//! Each policy mutates the shared flow-control state under the credit
//! controller's lock. None of them runs timers; RTT cycles are checked
//! opportunistically as PDUs arrive.

use crate::credit::{CongestionPhase, FlowControlState};
use crate::error::CreditError;
use crate::registry::{Capability, PolicySet};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::time::{Duration, Instant};

/// Capabilities every congestion policy set must advertise
pub const REQUIRED_CONGESTION_CAPABILITIES: &[Capability] = &[Capability::FlowControl];

const INITIAL_WINDOW: u32 = 3;
const MIN_WINDOW: u32 = 2;
/// Accumulator precision for fractional window growth
const CREDIT_PRECISION: u64 = 1_000_000;
/// Ceiling of the 10-bit fixed-point mark density
const DCTCP_MAX_ALPHA: u32 = 1024;

/// Trait for congestion policies
pub trait CongestionPolicy: PolicySet {
    /// Resets the shared flow state to this policy's initial conditions
    fn install(&self, flow: &mut FlowControlState);

    /// Updates the window for one received PDU
    fn on_pdu(&self, flow: &mut FlowControlState, marked: bool, now: Instant);

    /// Adjusts a runtime parameter
    fn apply_parameter(&self, name: &str, _value: &str) -> Result<(), CreditError> {
        Err(CreditError::UnknownParameter(name.to_string()))
    }
}

/// Additive growth shared by the TCP-like policies: +1 per PDU in slow
/// start, +1 per window's worth of PDUs in congestion avoidance.
fn grow_window(flow: &mut FlowControlState, ssthresh: u32, acc: &mut u64) {
    match flow.phase {
        CongestionPhase::SlowStart => {
            flow.credit += 1;
            if flow.credit >= ssthresh {
                flow.phase = CongestionPhase::CongestionAvoidance;
            }
        }
        CongestionPhase::CongestionAvoidance => {
            *acc += CREDIT_PRECISION / flow.credit as u64;
            if *acc >= CREDIT_PRECISION {
                flow.credit += 1;
                *acc -= CREDIT_PRECISION;
            }
        }
    }
}

#[derive(Debug)]
struct RedState {
    ssthresh: u32,
    acc: u64,
    burst: u32,
}

impl RedState {
    fn fresh() -> Self {
        Self {
            ssthresh: u32::MAX,
            acc: 0,
            burst: 0,
        }
    }
}

/// TCP-style window halving with burst suppression.
///
/// A marked PDU halves the window (floor 2) and stores it as the slow
/// start threshold. Marks within the next window's worth of PDUs are
/// echoes of the same congestion event and are ignored.
#[derive(Debug)]
pub struct RedCongestion {
    state: Mutex<RedState>,
}

impl RedCongestion {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RedState::fresh()),
        }
    }
}

impl Default for RedCongestion {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicySet for RedCongestion {
    fn name(&self) -> &'static str {
        "red"
    }

    fn capabilities(&self) -> &'static [Capability] {
        REQUIRED_CONGESTION_CAPABILITIES
    }
}

impl CongestionPolicy for RedCongestion {
    fn install(&self, flow: &mut FlowControlState) {
        *self.state.lock() = RedState::fresh();
        flow.credit = INITIAL_WINDOW;
        flow.phase = CongestionPhase::SlowStart;
    }

    fn on_pdu(&self, flow: &mut FlowControlState, marked: bool, _now: Instant) {
        let mut state = self.state.lock();
        grow_window(flow, state.ssthresh, &mut state.acc);
        if marked && state.burst == 0 {
            flow.credit = (flow.credit >> 1).max(MIN_WINDOW);
            state.ssthresh = flow.credit;
            flow.phase = CongestionPhase::CongestionAvoidance;
            state.burst = flow.credit;
        } else if state.burst > 0 {
            state.burst -= 1;
        }
    }
}

#[derive(Debug)]
struct DctcpState {
    ssthresh: u32,
    acc: u64,
    alpha: u32,
    shift_g: u32,
    sent_total: u64,
    ecn_total: u64,
    cycle_start: Option<Instant>,
    cycle_rtt: Duration,
}

impl DctcpState {
    fn fresh(shift_g: u32) -> Self {
        Self {
            ssthresh: u32::MAX,
            acc: 0,
            alpha: DCTCP_MAX_ALPHA,
            shift_g,
            sent_total: 0,
            ecn_total: 0,
            cycle_start: None,
            cycle_rtt: Duration::ZERO,
        }
    }
}

/// DCTCP-style proportional backoff.
///
/// Alpha tracks the fraction of marked PDUs per RTT in 10-bit fixed
/// point; a marked PDU shrinks the window in proportion to it. Alpha
/// starts at the ceiling so marks bite before the first cycle completes.
#[derive(Debug)]
pub struct DctcpCongestion {
    state: Mutex<DctcpState>,
}

impl DctcpCongestion {
    /// `shift_g` is the EWMA gain exponent, at most 10.
    pub fn new(shift_g: u32) -> Self {
        Self {
            state: Mutex::new(DctcpState::fresh(shift_g)),
        }
    }
}

impl PolicySet for DctcpCongestion {
    fn name(&self) -> &'static str {
        "dctcp"
    }

    fn capabilities(&self) -> &'static [Capability] {
        REQUIRED_CONGESTION_CAPABILITIES
    }
}

impl CongestionPolicy for DctcpCongestion {
    fn install(&self, flow: &mut FlowControlState) {
        let mut state = self.state.lock();
        *state = DctcpState::fresh(state.shift_g);
        state.cycle_rtt = flow.rtt_estimate;
        flow.credit = INITIAL_WINDOW;
        flow.phase = CongestionPhase::SlowStart;
    }

    fn on_pdu(&self, flow: &mut FlowControlState, marked: bool, now: Instant) {
        let mut state = self.state.lock();
        if marked {
            state.ecn_total += 1;
            let reduction = ((flow.credit as u64 * state.alpha as u64) >> 11) as u32;
            flow.credit = flow.credit.saturating_sub(reduction).max(MIN_WINDOW);
            state.ssthresh = flow.credit;
            flow.phase = CongestionPhase::CongestionAvoidance;
        } else {
            grow_window(flow, state.ssthresh, &mut state.acc);
        }
        state.sent_total += 1;

        let start = *state.cycle_start.get_or_insert(now);
        if now.saturating_duration_since(start) >= state.cycle_rtt {
            // alpha = (1 - g) * alpha + g * F, per the DCTCP kernel patch
            state.alpha = state.alpha - (state.alpha >> state.shift_g)
                + ((state.ecn_total << (10 - state.shift_g)) / state.sent_total) as u32;
            state.sent_total = 0;
            state.ecn_total = 0;
            state.cycle_start = Some(now);
            state.cycle_rtt = flow.rtt_estimate;
        }
    }

    fn apply_parameter(&self, name: &str, value: &str) -> Result<(), CreditError> {
        match name {
            "shift_g" => {
                let parsed: u32 =
                    value
                        .parse()
                        .map_err(|_| CreditError::InvalidParameter {
                            name: name.to_string(),
                            value: value.to_string(),
                        })?;
                if parsed > 10 {
                    return Err(CreditError::InvalidParameter {
                        name: name.to_string(),
                        value: value.to_string(),
                    });
                }
                self.state.lock().shift_g = parsed;
                Ok(())
            }
            _ => Err(CreditError::UnknownParameter(name.to_string())),
        }
    }
}

#[derive(Debug)]
struct CasState {
    wc: u32,
    wp: u32,
    // 16.16 fixed point; the fraction survives across cycles
    real_window: u32,
    w_inc: u32,
    rcv_count: u32,
    ecn_count: u32,
}

/// Binary-feedback congestion avoidance.
///
/// Observes cycles of `wc + wp` PDUs and only counts marks on the last
/// `wc` of them. At each cycle boundary the window is multiplied by
/// 0.875 when more than half those PDUs were marked (never below 1), or
/// grown by `w_inc` otherwise, and the credit is republished.
#[derive(Debug)]
pub struct CasCongestion {
    initial_credit: u32,
    state: Mutex<CasState>,
}

impl CasCongestion {
    pub fn new(initial_credit: u32, w_inc: u32) -> Self {
        let initial_credit = initial_credit.max(1);
        Self {
            initial_credit,
            state: Mutex::new(CasState {
                wc: initial_credit,
                wp: 0,
                real_window: initial_credit << 16,
                w_inc,
                rcv_count: 0,
                ecn_count: 0,
            }),
        }
    }
}

impl PolicySet for CasCongestion {
    fn name(&self) -> &'static str {
        "cas"
    }

    fn capabilities(&self) -> &'static [Capability] {
        REQUIRED_CONGESTION_CAPABILITIES
    }
}

impl CongestionPolicy for CasCongestion {
    fn install(&self, flow: &mut FlowControlState) {
        let mut state = self.state.lock();
        let w_inc = state.w_inc;
        *state = CasState {
            wc: self.initial_credit,
            wp: 0,
            real_window: self.initial_credit << 16,
            w_inc,
            rcv_count: 0,
            ecn_count: 0,
        };
        flow.credit = self.initial_credit;
        flow.phase = CongestionPhase::CongestionAvoidance;
    }

    fn on_pdu(&self, flow: &mut FlowControlState, marked: bool, _now: Instant) {
        let mut state = self.state.lock();
        state.rcv_count += 1;
        // Marks in the first wp PDUs belong to the previous window.
        if state.rcv_count > state.wp && marked {
            state.ecn_count += 1;
        }
        if state.rcv_count == state.wc + state.wp {
            state.wp = state.wc;
            if state.ecn_count > (state.wc >> 1) {
                if state.wc != 1 {
                    state.real_window -= state.real_window >> 3;
                    state.wc = round_half_to_even(state.real_window);
                }
            } else {
                state.real_window += state.w_inc << 16;
                state.wc = round_half_to_even(state.real_window);
            }
            state.rcv_count = 0;
            state.ecn_count = 0;
            flow.credit = state.wc;
        }
    }

    fn apply_parameter(&self, name: &str, value: &str) -> Result<(), CreditError> {
        match name {
            "w_inc" => {
                let parsed: u32 =
                    value
                        .parse()
                        .map_err(|_| CreditError::InvalidParameter {
                            name: name.to_string(),
                            value: value.to_string(),
                        })?;
                self.state.lock().w_inc = parsed;
                Ok(())
            }
            _ => Err(CreditError::UnknownParameter(name.to_string())),
        }
    }
}

fn round_half_to_even(real_window: u32) -> u32 {
    let integer = real_window >> 16;
    let decimal = real_window & 0xFFFF;
    match decimal.cmp(&0x8000) {
        Ordering::Greater => integer + 1,
        Ordering::Less => integer,
        Ordering::Equal => integer + (integer & 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow_with_rtt(rtt: Duration) -> FlowControlState {
        FlowControlState::new(rtt)
    }

    #[test]
    fn test_red_initial_conditions() {
        let policy = RedCongestion::new();
        let mut flow = flow_with_rtt(Duration::from_millis(100));
        policy.install(&mut flow);
        assert_eq!(flow.credit, 3);
        assert_eq!(flow.phase, CongestionPhase::SlowStart);
    }

    #[test]
    fn test_red_slow_start_counts_up() {
        let policy = RedCongestion::new();
        let mut flow = flow_with_rtt(Duration::from_millis(100));
        policy.install(&mut flow);

        let now = Instant::now();
        for _ in 0..5 {
            policy.on_pdu(&mut flow, false, now);
        }
        assert_eq!(flow.credit, 8);
        assert_eq!(flow.phase, CongestionPhase::SlowStart);
    }

    #[test]
    fn test_red_halves_and_enters_avoidance() {
        let policy = RedCongestion::new();
        let mut flow = flow_with_rtt(Duration::from_millis(100));
        policy.install(&mut flow);

        let now = Instant::now();
        policy.on_pdu(&mut flow, false, now);
        policy.on_pdu(&mut flow, false, now);
        assert_eq!(flow.credit, 5);

        // The marked PDU still grows the window before halving it.
        policy.on_pdu(&mut flow, true, now);
        assert_eq!(flow.credit, 3);
        assert_eq!(flow.phase, CongestionPhase::CongestionAvoidance);
    }

    #[test]
    fn test_red_burst_suppression() {
        let policy = RedCongestion::new();
        let mut flow = flow_with_rtt(Duration::from_millis(100));
        policy.install(&mut flow);

        let now = Instant::now();
        policy.on_pdu(&mut flow, true, now);
        assert_eq!(flow.credit, 2);
        // The next two marks fall inside the suppression window.
        policy.on_pdu(&mut flow, true, now);
        assert_eq!(flow.credit, 2);
        policy.on_pdu(&mut flow, true, now);
        assert_eq!(flow.credit, 3);
        // Suppression expired, this mark halves again.
        policy.on_pdu(&mut flow, true, now);
        assert_eq!(flow.credit, 2);
    }

    #[test]
    fn test_red_avoidance_fractional_growth() {
        let policy = RedCongestion::new();
        let mut flow = flow_with_rtt(Duration::from_millis(100));
        policy.install(&mut flow);

        let now = Instant::now();
        policy.on_pdu(&mut flow, true, now);
        assert_eq!(flow.credit, 2);

        policy.on_pdu(&mut flow, false, now);
        assert_eq!(flow.credit, 2);
        policy.on_pdu(&mut flow, false, now);
        assert_eq!(flow.credit, 3);

        // Integer accumulator arithmetic needs four steps at credit 3.
        for _ in 0..3 {
            policy.on_pdu(&mut flow, false, now);
            assert_eq!(flow.credit, 3);
        }
        policy.on_pdu(&mut flow, false, now);
        assert_eq!(flow.credit, 4);
    }

    #[test]
    fn test_dctcp_first_mark_bites() {
        let policy = DctcpCongestion::new(4);
        let mut flow = flow_with_rtt(Duration::from_secs(3600));
        policy.install(&mut flow);

        policy.on_pdu(&mut flow, true, Instant::now());
        assert_eq!(flow.credit, 2);
        assert_eq!(flow.phase, CongestionPhase::CongestionAvoidance);
    }

    #[test]
    fn test_dctcp_growth_without_marks() {
        let policy = DctcpCongestion::new(4);
        let mut flow = flow_with_rtt(Duration::from_secs(3600));
        policy.install(&mut flow);

        let now = Instant::now();
        for _ in 0..5 {
            policy.on_pdu(&mut flow, false, now);
        }
        assert_eq!(flow.credit, 8);
        assert_eq!(flow.phase, CongestionPhase::SlowStart);
    }

    #[test]
    fn test_dctcp_alpha_decays_per_cycle() {
        let policy = DctcpCongestion::new(4);
        // Zero RTT makes every PDU a cycle boundary.
        let mut flow = flow_with_rtt(Duration::ZERO);
        policy.install(&mut flow);

        let now = Instant::now();
        policy.on_pdu(&mut flow, false, now);
        assert_eq!(flow.credit, 4);
        policy.on_pdu(&mut flow, false, now);
        assert_eq!(flow.credit, 5);

        // Alpha has decayed twice, so the reduction is smaller than a
        // full-alpha halving would give.
        policy.on_pdu(&mut flow, true, now);
        assert_eq!(flow.credit, 3);
        policy.on_pdu(&mut flow, true, now);
        assert_eq!(flow.credit, 2);
    }

    #[test]
    fn test_dctcp_no_alpha_update_within_cycle() {
        let policy = DctcpCongestion::new(4);
        let mut flow = flow_with_rtt(Duration::from_millis(100));
        policy.install(&mut flow);

        let now = Instant::now();
        for _ in 0..3 {
            policy.on_pdu(&mut flow, false, now);
        }
        assert_eq!(flow.credit, 6);

        // Still inside the first cycle, alpha is at the ceiling.
        policy.on_pdu(&mut flow, true, now);
        assert_eq!(flow.credit, 3);
    }

    #[test]
    fn test_dctcp_shift_g_parameter() {
        let policy = DctcpCongestion::new(4);
        policy.apply_parameter("shift_g", "2").unwrap();
        assert!(matches!(
            policy.apply_parameter("shift_g", "11"),
            Err(CreditError::InvalidParameter { .. })
        ));
        assert!(matches!(
            policy.apply_parameter("shift_g", "fast"),
            Err(CreditError::InvalidParameter { .. })
        ));
        assert!(matches!(
            policy.apply_parameter("gain", "2"),
            Err(CreditError::UnknownParameter(_))
        ));
    }

    #[test]
    fn test_cas_installs_initial_credit() {
        let policy = CasCongestion::new(5, 1);
        let mut flow = flow_with_rtt(Duration::from_millis(100));
        policy.install(&mut flow);
        assert_eq!(flow.credit, 5);
    }

    #[test]
    fn test_cas_additive_increase() {
        let policy = CasCongestion::new(2, 1);
        let mut flow = flow_with_rtt(Duration::from_millis(100));
        policy.install(&mut flow);

        let now = Instant::now();
        policy.on_pdu(&mut flow, false, now);
        // Credit only changes at cycle boundaries.
        assert_eq!(flow.credit, 2);
        policy.on_pdu(&mut flow, false, now);
        assert_eq!(flow.credit, 3);

        // Next cycle spans wc + wp = 5 PDUs.
        for _ in 0..4 {
            policy.on_pdu(&mut flow, false, now);
            assert_eq!(flow.credit, 3);
        }
        policy.on_pdu(&mut flow, false, now);
        assert_eq!(flow.credit, 4);
    }

    #[test]
    fn test_cas_multiplicative_decrease() {
        let policy = CasCongestion::new(8, 1);
        let mut flow = flow_with_rtt(Duration::from_millis(100));
        policy.install(&mut flow);

        let now = Instant::now();
        for _ in 0..8 {
            policy.on_pdu(&mut flow, true, now);
        }
        assert_eq!(flow.credit, 7);
    }

    #[test]
    fn test_cas_previous_window_marks_ignored() {
        let policy = CasCongestion::new(2, 1);
        let mut flow = flow_with_rtt(Duration::from_millis(100));
        policy.install(&mut flow);

        let now = Instant::now();
        policy.on_pdu(&mut flow, false, now);
        policy.on_pdu(&mut flow, false, now);
        assert_eq!(flow.credit, 3);

        // First wp = 2 PDUs carry marks from the previous window; they
        // must not count against the current one.
        policy.on_pdu(&mut flow, true, now);
        policy.on_pdu(&mut flow, true, now);
        for _ in 0..3 {
            policy.on_pdu(&mut flow, false, now);
        }
        assert_eq!(flow.credit, 4);
    }

    #[test]
    fn test_cas_window_floor_one() {
        let policy = CasCongestion::new(1, 1);
        let mut flow = flow_with_rtt(Duration::from_millis(100));
        policy.install(&mut flow);

        let now = Instant::now();
        for _ in 0..6 {
            policy.on_pdu(&mut flow, true, now);
        }
        assert_eq!(flow.credit, 1);
    }

    #[test]
    fn test_cas_w_inc_parameter() {
        let policy = CasCongestion::new(2, 1);
        let mut flow = flow_with_rtt(Duration::from_millis(100));
        policy.install(&mut flow);
        policy.apply_parameter("w_inc", "3").unwrap();

        let now = Instant::now();
        policy.on_pdu(&mut flow, false, now);
        policy.on_pdu(&mut flow, false, now);
        assert_eq!(flow.credit, 5);
    }

    #[test]
    fn test_round_half_to_even() {
        assert_eq!(round_half_to_even(0x0002_8000), 2);
        assert_eq!(round_half_to_even(0x0003_8000), 4);
        assert_eq!(round_half_to_even(0x0002_4000), 2);
        assert_eq!(round_half_to_even(0x0002_C000), 3);
    }
}
