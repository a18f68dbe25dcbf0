//! Balance reconciliation: replaying transaction history instead of
//! trusting a stored running total.

mod engine;

pub use engine::{
    BalanceReconciler, RecalculatedBalance, ReconcileSummary, ReconcileTarget, BALANCE_EPSILON,
};
