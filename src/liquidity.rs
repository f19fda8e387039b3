// 9.x liquidity commitments. LPs lock a bond against a market and bid a fee;
// the market charges the fee at which committed stake first covers the target
// and shares the collected pool between LPs by stake. An LP that spends too
// little of a period quoting its commitment forfeits its share and may lose
// part of its bond.

use crate::amount::Amount;
use crate::num::{self, InvariantViolation};
use crate::types::{MarketId, PartyId, Timestamp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum LiquidityError {
    #[error("commitment {provided} is below the minimum {minimum}")]
    CommitmentTooLow { provided: Amount, minimum: Amount },

    #[error("fee bid must be between 0 and 1")]
    InvalidFee,

    #[error("party already has a commitment in this market")]
    AlreadyCommitted,

    #[error("no commitment for party in this market")]
    NotFound,

    #[error("commitment id {0} does not match the party's provision")]
    WrongProvision(String),

    #[error("amendment changes nothing")]
    EmptyAmendment,

    #[error("market is not accepting liquidity commitments")]
    MarketClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProvisionStatus {
    Active,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityProvision {
    pub id: String,
    pub party: PartyId,
    pub market: MarketId,
    pub commitment_amount: Amount,
    pub fee: Decimal,
    pub reference: String,
    pub status: ProvisionStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// Arrival order, breaks ties between equal fee bids.
    pub seq: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquiditySubmission {
    pub market: MarketId,
    pub commitment_amount: Amount,
    pub fee: Decimal,
    #[serde(default)]
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityAmendment {
    pub market: MarketId,
    #[serde(default)]
    pub commitment_amount: Option<Amount>,
    #[serde(default)]
    pub fee: Option<Decimal>,
    #[serde(default)]
    pub reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityCancellation {
    pub market: MarketId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetStakeParameters {
    pub time_window_secs: i64,
    pub scaling_factor: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityMonitoringParameters {
    pub target_stake: TargetStakeParameters,
    /// Supplied below target times this ratio starts a liquidity auction.
    pub triggering_ratio: Decimal,
    pub auction_extension_secs: i64,
}

impl Default for LiquidityMonitoringParameters {
    fn default() -> Self {
        Self {
            target_stake: TargetStakeParameters {
                time_window_secs: 3600,
                scaling_factor: dec!(1),
            },
            triggering_ratio: Decimal::ZERO,
            auction_extension_secs: 1,
        }
    }
}

/// What a provider owes the book between two fee distributions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiquiditySlaParameters {
    /// Orders count when priced within this fraction of the reference price.
    pub price_range: Decimal,
    /// Share of the period the obligation must be met to earn fees.
    pub commitment_min_time_fraction: Decimal,
    /// Bond share slashed at a full miss; scales down with the time met.
    pub non_performance_bond_penalty_slope: Decimal,
    pub non_performance_bond_penalty_max: Decimal,
    /// Notional each side must quote per unit of commitment.
    pub stake_to_ccy_volume: Decimal,
}

impl Default for LiquiditySlaParameters {
    fn default() -> Self {
        Self {
            price_range: dec!(0.05),
            commitment_min_time_fraction: Decimal::ZERO,
            non_performance_bond_penalty_slope: Decimal::ZERO,
            non_performance_bond_penalty_max: Decimal::ZERO,
            stake_to_ccy_volume: Decimal::ONE,
        }
    }
}

impl LiquiditySlaParameters {
    pub fn is_valid(&self) -> bool {
        let unit = Decimal::ZERO..=Decimal::ONE;
        self.price_range > Decimal::ZERO
            && unit.contains(&self.commitment_min_time_fraction)
            && !self.non_performance_bond_penalty_slope.is_sign_negative()
            && unit.contains(&self.non_performance_bond_penalty_max)
            && !self.stake_to_ccy_volume.is_sign_negative()
    }

    /// Fraction of the bond slashed for meeting the obligation `fraction` of the time.
    pub fn bond_penalty(&self, fraction: Decimal) -> Decimal {
        let floor = self.commitment_min_time_fraction;
        if fraction >= floor {
            return Decimal::ZERO;
        }
        // floor is positive here since fraction is not negative
        let met = fraction.checked_div(floor).unwrap_or(Decimal::ZERO);
        let shortfall = Decimal::ONE - met;
        self.non_performance_bond_penalty_slope
            .saturating_mul(shortfall)
            .min(self.non_performance_bond_penalty_max)
    }
}

/// Time one provider spent meeting its obligation in the current period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct SlaTracker {
    period_start: Timestamp,
    meeting_since: Option<Timestamp>,
    met_secs: i64,
}

impl SlaTracker {
    fn new(now: Timestamp) -> Self {
        Self {
            period_start: now,
            meeting_since: None,
            met_secs: 0,
        }
    }

    fn observe(&mut self, meets: bool, now: Timestamp) {
        match (self.meeting_since, meets) {
            (None, true) => self.meeting_since = Some(now),
            (Some(since), false) => {
                self.met_secs = self.met_secs.saturating_add(now.secs_since(since));
                self.meeting_since = None;
            }
            _ => {}
        }
    }

    /// Share of the period so far spent meeting the obligation. A period
    /// with no length counts as met.
    fn fraction(&self, now: Timestamp) -> Decimal {
        let elapsed = now.secs_since(self.period_start);
        if elapsed <= 0 {
            return Decimal::ONE;
        }
        let running = self.meeting_since.map_or(0, |since| now.secs_since(since));
        let met = self.met_secs.saturating_add(running).min(elapsed);
        Decimal::from(met)
            .checked_div(Decimal::from(elapsed))
            .unwrap_or(Decimal::ONE)
    }

    fn restart(&mut self, now: Timestamp) {
        self.period_start = now;
        self.met_secs = 0;
        self.meeting_since = self.meeting_since.map(|_| now);
    }
}

/// Result of one fee distribution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Distribution {
    pub shares: Vec<(PartyId, Amount)>,
    /// Bond taken from each underperforming provider.
    pub penalties: Vec<(PartyId, Amount)>,
    /// Provisions whose commitment shrank with the penalty. Cancelled once nothing is left.
    pub updated: Vec<LiquidityProvision>,
}

/// How much a bond moves when a commitment changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BondChange {
    TopUp(Amount),
    Release(Amount),
    Unchanged,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidityEngine {
    market: MarketId,
    params: LiquidityMonitoringParameters,
    sla: LiquiditySlaParameters,
    provisions: BTreeMap<PartyId, LiquidityProvision>,
    performance: BTreeMap<PartyId, SlaTracker>,
    open_interest: VecDeque<(Timestamp, u64)>,
    next_seq: u64,
    last_distribution: Timestamp,
}

impl LiquidityEngine {
    pub fn new(
        market: MarketId,
        params: LiquidityMonitoringParameters,
        sla: LiquiditySlaParameters,
        now: Timestamp,
    ) -> Self {
        Self {
            market,
            params,
            sla,
            provisions: BTreeMap::new(),
            performance: BTreeMap::new(),
            open_interest: VecDeque::new(),
            next_seq: 1,
            last_distribution: now,
        }
    }

    pub fn params(&self) -> &LiquidityMonitoringParameters {
        &self.params
    }

    pub fn sla(&self) -> &LiquiditySlaParameters {
        &self.sla
    }

    pub fn provision(&self, party: &PartyId) -> Option<&LiquidityProvision> {
        self.provisions.get(party)
    }

    pub fn provisions(&self) -> impl Iterator<Item = &LiquidityProvision> {
        self.provisions.values()
    }

    pub fn supplied_stake(&self) -> Amount {
        self.provisions.values().map(|p| &p.commitment_amount).sum()
    }

    fn validate_fee(fee: Decimal) -> Result<(), LiquidityError> {
        if fee.is_sign_negative() || fee > Decimal::ONE {
            return Err(LiquidityError::InvalidFee);
        }
        Ok(())
    }

    pub fn validate_submission(
        &self,
        party: &PartyId,
        submission: &LiquiditySubmission,
        minimum: &Amount,
    ) -> Result<(), LiquidityError> {
        if self.provisions.contains_key(party) {
            return Err(LiquidityError::AlreadyCommitted);
        }
        Self::validate_fee(submission.fee)?;
        if submission.commitment_amount.is_zero() || &submission.commitment_amount < minimum {
            return Err(LiquidityError::CommitmentTooLow {
                provided: submission.commitment_amount.clone(),
                minimum: minimum.clone(),
            });
        }
        Ok(())
    }

    /// 9.1: register a new commitment. The caller moves the bond.
    pub fn submit(
        &mut self,
        id: String,
        party: &PartyId,
        submission: &LiquiditySubmission,
        minimum: &Amount,
        now: Timestamp,
    ) -> Result<LiquidityProvision, LiquidityError> {
        self.validate_submission(party, submission, minimum)?;

        let provision = LiquidityProvision {
            id,
            party: party.clone(),
            market: self.market.clone(),
            commitment_amount: submission.commitment_amount.clone(),
            fee: submission.fee,
            reference: submission.reference.clone(),
            status: ProvisionStatus::Active,
            created_at: now,
            updated_at: now,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.provisions.insert(party.clone(), provision.clone());
        self.performance.insert(party.clone(), SlaTracker::new(now));
        Ok(provision)
    }

    /// What an amendment would do to the bond, without applying it.
    pub fn preview_amend(
        &self,
        id: &str,
        party: &PartyId,
        amendment: &LiquidityAmendment,
        minimum: &Amount,
    ) -> Result<BondChange, LiquidityError> {
        let current = self.provisions.get(party).ok_or(LiquidityError::NotFound)?;
        if current.id != id {
            return Err(LiquidityError::WrongProvision(id.to_string()));
        }
        if amendment.commitment_amount.is_none() && amendment.fee.is_none() && amendment.reference.is_none() {
            return Err(LiquidityError::EmptyAmendment);
        }
        if let Some(fee) = amendment.fee {
            Self::validate_fee(fee)?;
        }
        let Some(target) = &amendment.commitment_amount else {
            return Ok(BondChange::Unchanged);
        };
        if target.is_zero() || target < minimum {
            return Err(LiquidityError::CommitmentTooLow {
                provided: target.clone(),
                minimum: minimum.clone(),
            });
        }
        Ok(match target.cmp(&current.commitment_amount) {
            std::cmp::Ordering::Greater => BondChange::TopUp(target.saturating_sub(&current.commitment_amount)),
            std::cmp::Ordering::Less => BondChange::Release(current.commitment_amount.saturating_sub(target)),
            std::cmp::Ordering::Equal => BondChange::Unchanged,
        })
    }

    pub fn amend(
        &mut self,
        party: &PartyId,
        amendment: &LiquidityAmendment,
        now: Timestamp,
    ) -> Result<LiquidityProvision, LiquidityError> {
        let provision = self.provisions.get_mut(party).ok_or(LiquidityError::NotFound)?;
        if let Some(amount) = &amendment.commitment_amount {
            provision.commitment_amount = amount.clone();
        }
        if let Some(fee) = amendment.fee {
            provision.fee = fee;
        }
        if let Some(reference) = &amendment.reference {
            provision.reference = reference.clone();
        }
        provision.updated_at = now;
        Ok(provision.clone())
    }

    pub fn cancel(&mut self, id: &str, party: &PartyId, now: Timestamp) -> Result<LiquidityProvision, LiquidityError> {
        match self.provisions.get(party) {
            None => return Err(LiquidityError::NotFound),
            Some(p) if p.id != id => return Err(LiquidityError::WrongProvision(id.to_string())),
            Some(_) => {}
        }
        let mut provision = self.provisions.remove(party).ok_or(LiquidityError::NotFound)?;
        self.performance.remove(party);
        provision.status = ProvisionStatus::Cancelled;
        provision.updated_at = now;
        Ok(provision)
    }

    /// Drop every commitment, returning them. Used at final settlement.
    pub fn close_all(&mut self, now: Timestamp) -> Vec<LiquidityProvision> {
        self.performance.clear();
        std::mem::take(&mut self.provisions)
            .into_values()
            .map(|mut p| {
                p.status = ProvisionStatus::Cancelled;
                p.updated_at = now;
                p
            })
            .collect()
    }

    // ---- target stake ----

    /// 9.2: remember open interest so the target can look back over its window.
    pub fn record_open_interest(&mut self, now: Timestamp, open_interest: u64) {
        if self.open_interest.back().map(|(_, oi)| *oi) == Some(open_interest) {
            return;
        }
        self.open_interest.push_back((now, open_interest));
        let Ok(cutoff) = now.sub_secs(self.params.target_stake.time_window_secs) else { return };
        while self.open_interest.len() > 1 && self.open_interest.get(1).map(|(t, _)| *t <= cutoff).unwrap_or(false) {
            self.open_interest.pop_front();
        }
    }

    fn max_open_interest(&self, now: Timestamp, current: u64) -> u64 {
        // a window reaching past the start of time covers every entry
        let cutoff = now
            .sub_secs(self.params.target_stake.time_window_secs)
            .unwrap_or(Timestamp(i64::MIN));
        let mut max = current;
        for (i, (t, oi)) in self.open_interest.iter().enumerate() {
            let still_in_window = *t >= cutoff
                || self
                    .open_interest
                    .get(i + 1)
                    .map(|(next, _)| *next > cutoff)
                    .unwrap_or(true);
            if still_in_window {
                max = max.max(*oi);
            }
        }
        max
    }

    /// Required stake. `current_oi` already includes indicative volume during auctions.
    pub fn target_stake(
        &self,
        reference_price: Decimal,
        max_risk_factor: Decimal,
        current_oi: u64,
        now: Timestamp,
    ) -> Result<Amount, InvariantViolation> {
        let oi = Decimal::from(self.max_open_interest(now, current_oi));
        let notional = num::mul(oi, reference_price)?;
        let scaled = num::mul(notional, self.params.target_stake.scaling_factor)?;
        Amount::from_decimal_ceil(num::mul(scaled, max_risk_factor)?)
    }

    /// 9.3: fee bid of the provider whose stake, cumulated from the cheapest bid
    /// up, first reaches the target. The most expensive bid if it never does.
    pub fn liquidity_fee(&self, target: &Amount) -> Decimal {
        let mut ranked: Vec<&LiquidityProvision> = self.provisions.values().collect();
        ranked.sort_by(|a, b| a.fee.cmp(&b.fee).then(a.seq.cmp(&b.seq)));

        let mut cumulative = Amount::zero();
        for p in &ranked {
            cumulative = cumulative.add(&p.commitment_amount);
            if &cumulative >= target {
                return p.fee;
            }
        }
        ranked.last().map(|p| p.fee).unwrap_or(Decimal::ZERO)
    }

    /// Whether supplied stake has fallen below the auction threshold.
    pub fn is_under_supplied(&self, target: &Amount) -> Result<bool, InvariantViolation> {
        if target.is_zero() {
            return Ok(false);
        }
        let supplied = self.supplied_stake().to_decimal()?;
        let threshold = num::mul(target.to_decimal()?, self.params.triggering_ratio)?;
        Ok(supplied < threshold)
    }

    // ---- fee distribution ----

    pub fn distribution_due(&self, now: Timestamp, period_secs: i64) -> bool {
        now.secs_since(self.last_distribution) >= period_secs
    }

    /// 9.4: note whether `party` meets its obligation from `now` on.
    pub fn observe(&mut self, party: &PartyId, meets: bool, now: Timestamp) {
        if let Some(tracker) = self.performance.get_mut(party) {
            tracker.observe(meets, now);
        }
    }

    /// Share of the current period `party` has met its obligation.
    pub fn time_fraction(&self, party: &PartyId, now: Timestamp) -> Option<Decimal> {
        self.performance.get(party).map(|t| t.fraction(now))
    }

    /// Split `pool` by stake, rounding down. Providers short of the minimum
    /// time fraction forfeit their share, which stays in the pool with the
    /// rounding dust, and lose bond by the penalty. Every provider starts a
    /// new period.
    pub fn distribute(&mut self, pool: &Amount, now: Timestamp) -> Result<Distribution, InvariantViolation> {
        self.last_distribution = now;
        let total = self.supplied_stake();
        let mut out = Distribution::default();

        for p in self.provisions.values_mut() {
            let fraction = self
                .performance
                .get(&p.party)
                .map_or(Decimal::ONE, |t| t.fraction(now));

            if fraction >= self.sla.commitment_min_time_fraction {
                if let Some(share) = pool.mul_div(&p.commitment_amount, &total) {
                    if !share.is_zero() {
                        out.shares.push((p.party.clone(), share));
                    }
                }
            }

            let rate = self.sla.bond_penalty(fraction);
            if rate.is_zero() {
                continue;
            }
            let penalty = p.commitment_amount.mul_decimal_floor(rate)?;
            if !penalty.is_zero() {
                p.commitment_amount = p.commitment_amount.saturating_sub(&penalty);
                p.updated_at = now;
                out.penalties.push((p.party.clone(), penalty));
                out.updated.push(p.clone());
            }
        }

        for p in out.updated.iter_mut().filter(|p| p.commitment_amount.is_zero()) {
            p.status = ProvisionStatus::Cancelled;
            self.provisions.remove(&p.party);
            self.performance.remove(&p.party);
        }
        for tracker in self.performance.values_mut() {
            tracker.restart(now);
        }
        Ok(out)
    }
}
