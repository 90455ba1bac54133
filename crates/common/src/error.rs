use thiserror::Error;

use crate::StrategyStatus;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown strategy type '{0}'")]
    UnknownStrategyType(String),

    #[error("strategy not found: {0}")]
    StrategyNotFound(String),

    #[error("trade not found: {0}")]
    TradeNotFound(String),

    #[error("cannot {op} strategy in {from} state")]
    InvalidTransition {
        op: &'static str,
        from: StrategyStatus,
    },

    #[error("setup failed: {0}")]
    SetupFailed(String),

    #[error("analysis failed: {0}")]
    AnalysisFailed(String),

    #[error("trade rejected: {0}")]
    TradeRejected(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
