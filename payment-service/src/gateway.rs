//! Settlement decision capability.
//!
//! The processor never decides success or failure itself; it asks a
//! gateway. Production wires in [`BernoulliGateway`] with an explicit
//! success rate, tests use [`FixedGateway`] for deterministic outcomes.

use bigdecimal::BigDecimal;
use uuid::Uuid;

/// Outcome of a settlement decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    Approved { transaction_id: String },
    Declined { reason: String },
}

/// Decides whether a charge settles. Implementations are pure decision
/// functions; persistence stays with the processor.
pub trait SettlementGateway: Send + Sync {
    fn settle(&self, order_id: i64, amount: &BigDecimal) -> SettlementOutcome;
}

fn new_transaction_id() -> String {
    format!("TXN-{}", Uuid::new_v4().to_string()[..18].to_uppercase())
}

/// Simulated gateway: an independent Bernoulli trial per charge, ignoring
/// order content. Stand-in for a real acquirer integration.
pub struct BernoulliGateway {
    success_rate: f64,
}

impl BernoulliGateway {
    pub fn new(success_rate: f64) -> Self {
        Self {
            success_rate: success_rate.clamp(0.0, 1.0),
        }
    }
}

impl SettlementGateway for BernoulliGateway {
    fn settle(&self, _order_id: i64, _amount: &BigDecimal) -> SettlementOutcome {
        if rand::random::<f64>() < self.success_rate {
            SettlementOutcome::Approved {
                transaction_id: new_transaction_id(),
            }
        } else {
            SettlementOutcome::Declined {
                reason: "insufficient funds or invalid card".to_string(),
            }
        }
    }
}

/// Deterministic gateway for tests.
pub struct FixedGateway {
    approve: bool,
}

impl FixedGateway {
    pub fn approving() -> Self {
        Self { approve: true }
    }

    pub fn declining() -> Self {
        Self { approve: false }
    }
}

impl SettlementGateway for FixedGateway {
    fn settle(&self, _order_id: i64, _amount: &BigDecimal) -> SettlementOutcome {
        if self.approve {
            SettlementOutcome::Approved {
                transaction_id: new_transaction_id(),
            }
        } else {
            SettlementOutcome::Declined {
                reason: "declined by test gateway".to_string(),
            }
        }
    }
}
