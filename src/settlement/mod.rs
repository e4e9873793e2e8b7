pub mod oracle;

pub use oracle::{
    classify_move, proxy_asset, OutcomeFeedback, PendingSettlement, SettlementOracle,
    SettlementOutcome,
};
