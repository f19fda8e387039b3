// 12.6: liquidity commitments as seen from the market: bonds, obligations,
// fee pool distribution and the liquidity auction trigger.

use super::{AuctionTrigger, ExecCtx, Market, MarketError, TradingMode};
use crate::amount::Amount;
use crate::events::EventPayload;
use crate::ledger::{AccountKey, TransferBatch, TransferKind};
use crate::liquidity::{BondChange, LiquidityAmendment, LiquidityError, LiquiditySubmission};
use crate::num::InvariantViolation;
use crate::types::{PartyId, Side, Timestamp};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

impl Market {
    fn bond_key(&self, party: &PartyId) -> AccountKey {
        AccountKey::bond(party, &self.config.id, &self.config.settlement_asset)
    }

    fn minimum_commitment(ctx: &ExecCtx<'_>) -> Amount {
        Amount::from(ctx.network.minimum_lp_commitment)
    }

    /// 12.6.1: commit stake. The bond leaves general before the commitment counts.
    pub fn submit_liquidity_provision(
        &mut self,
        ctx: &mut ExecCtx<'_>,
        party: &PartyId,
        id: String,
        submission: &LiquiditySubmission,
    ) -> Result<(), MarketError> {
        if !self.state.accepts_orders() {
            return Err(LiquidityError::MarketClosed.into());
        }
        let minimum = Self::minimum_commitment(ctx);
        self.liquidity.validate_submission(party, submission, &minimum)?;

        let mut batch = TransferBatch::new();
        batch.push(
            AccountKey::general(party, &self.config.settlement_asset),
            self.bond_key(party),
            submission.commitment_amount.clone(),
            TransferKind::BondLow,
        );
        ctx.try_apply(&batch)?;

        let provision = self.liquidity.submit(id, party, submission, &minimum, ctx.now)?;
        info!(market = %self.config.id, party = %party, stake = %provision.commitment_amount, "liquidity committed");
        ctx.emit(EventPayload::LiquidityProvision(provision));
        self.publish(ctx)?;
        Ok(())
    }

    /// 12.6.2: change stake or fee bid. A smaller stake releases bond at once.
    pub fn amend_liquidity_provision(
        &mut self,
        ctx: &mut ExecCtx<'_>,
        party: &PartyId,
        id: &str,
        amendment: &LiquidityAmendment,
    ) -> Result<(), MarketError> {
        if !self.state.accepts_orders() {
            return Err(LiquidityError::MarketClosed.into());
        }
        let minimum = Self::minimum_commitment(ctx);
        let general = AccountKey::general(party, &self.config.settlement_asset);
        let mut batch = TransferBatch::new();
        match self.liquidity.preview_amend(id, party, amendment, &minimum)? {
            BondChange::TopUp(amount) => batch.push(general, self.bond_key(party), amount, TransferKind::BondLow),
            BondChange::Release(amount) => batch.push(self.bond_key(party), general, amount, TransferKind::BondHigh),
            BondChange::Unchanged => {}
        }
        ctx.try_apply(&batch)?;

        let provision = self.liquidity.amend(party, amendment, ctx.now)?;
        ctx.emit(EventPayload::LiquidityProvision(provision));
        self.check_liquidity(ctx)?;
        self.publish(ctx)?;
        Ok(())
    }

    /// 12.6.3: withdraw the commitment and its whole bond.
    pub fn cancel_liquidity_provision(&mut self, ctx: &mut ExecCtx<'_>, party: &PartyId, id: &str) -> Result<(), MarketError> {
        if self.state.is_final() {
            return Err(LiquidityError::MarketClosed.into());
        }
        let provision = self.liquidity.cancel(id, party, ctx.now)?;
        let bond = self.bond_key(party);
        let mut batch = TransferBatch::new();
        batch.push(
            bond.clone(),
            AccountKey::general(party, &self.config.settlement_asset),
            ctx.ledger.balance(&bond),
            TransferKind::BondHigh,
        );
        ctx.apply(&batch)?;
        ctx.emit(EventPayload::LiquidityProvision(provision));
        self.check_liquidity(ctx)?;
        self.publish(ctx)?;
        Ok(())
    }

    /// Whether `party` quotes its commitment on both sides within the SLA
    /// price range of `reference`.
    fn meets_obligation(&self, party: &PartyId, commitment: Decimal, reference: Option<Decimal>) -> bool {
        let sla = self.liquidity.sla();
        let required = commitment.saturating_mul(sla.stake_to_ccy_volume);
        if required.is_zero() {
            return true;
        }
        let Some(reference) = reference else { return false };
        let low = reference.saturating_mul(Decimal::ONE.saturating_sub(sla.price_range));
        let high = reference.saturating_mul(Decimal::ONE.saturating_add(sla.price_range));

        let (mut bids, mut asks) = (Decimal::ZERO, Decimal::ZERO);
        for order in self.book.party_orders(party) {
            let Some(price) = order.price.map(|p| p.value()) else { continue };
            let notional = price.saturating_mul(Decimal::from(order.true_remaining()));
            match order.side {
                Side::Buy if price >= low => bids = bids.saturating_add(notional),
                Side::Sell if price <= high => asks = asks.saturating_add(notional),
                _ => {}
            }
        }
        bids >= required && asks >= required
    }

    /// 12.6.4: record which providers meet their obligation as of `now`. The
    /// reference is the mid in continuous trading, the indicative price in auctions.
    pub(super) fn observe_obligations(&mut self, now: Timestamp) {
        let reference = if self.mode.is_auction() {
            self.book.indicative().map(|i| i.price.value())
        } else {
            self.book.mid()
        };
        let observed: Vec<(PartyId, bool)> = self
            .liquidity
            .provisions()
            .map(|p| {
                // a commitment too large for a decimal is never met
                let commitment = p.commitment_amount.to_decimal().unwrap_or(Decimal::MAX);
                (p.party.clone(), self.meets_obligation(&p.party, commitment, reference))
            })
            .collect();
        for (party, meets) in observed {
            self.liquidity.observe(&party, meets, now);
        }
    }

    /// 12.6.5: pay the fee pool out to providers by stake and slash the bonds
    /// of those that missed their obligation. Rounding dust and forfeited
    /// shares stay in the pool.
    pub(super) fn distribute_liquidity_fees(&mut self, ctx: &mut ExecCtx<'_>) -> Result<(), InvariantViolation> {
        self.observe_obligations(ctx.now);
        let asset = self.config.settlement_asset.clone();
        let pool_key = AccountKey::liquidity_fees(&self.config.id, &asset);
        let pool = ctx.ledger.balance(&pool_key);
        let distribution = self.liquidity.distribute(&pool, ctx.now)?;

        let mut batch = TransferBatch::new();
        if !distribution.shares.is_empty() {
            debug!(market = %self.config.id, %pool, providers = distribution.shares.len(), "distributing liquidity fees");
        }
        for (party, share) in distribution.shares {
            batch.push(
                pool_key.clone(),
                AccountKey::general(&party, &asset),
                share,
                TransferKind::LiquidityFeeDistribute,
            );
        }
        for (party, penalty) in distribution.penalties {
            warn!(market = %self.config.id, party = %party, %penalty, "liquidity obligation missed, bond slashed");
            batch.push(
                self.bond_key(&party),
                AccountKey::insurance(&self.config.id, &asset),
                penalty,
                TransferKind::BondSlashing,
            );
        }
        ctx.apply(&batch)?;
        for provision in distribution.updated {
            ctx.emit(EventPayload::LiquidityProvision(provision));
        }
        Ok(())
    }

    /// 12.6.6: start a liquidity auction if continuous trading lacks stake.
    pub(super) fn check_liquidity(&mut self, ctx: &mut ExecCtx<'_>) -> Result<(), InvariantViolation> {
        if self.mode != TradingMode::Continuous {
            return Ok(());
        }
        let target = self.target_stake(ctx.now)?;
        if self.liquidity.is_under_supplied(&target)? {
            info!(market = %self.config.id, %target, supplied = %self.liquidity.supplied_stake(), "insufficient liquidity");
            let secs = self.liquidity.params().auction_extension_secs;
            self.enter_auction(ctx, AuctionTrigger::Liquidity, secs)?;
        }
        Ok(())
    }
}
