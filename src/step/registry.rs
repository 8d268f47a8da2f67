//! Catalog of step types the user can pick from

use super::StepKind;
use crate::error::{BridgeError, BridgeResult};

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepType {
    pub title: String,
    pub kind: StepKind,
}

/// Ordered, immutable list of step types
#[derive(Debug, Clone)]
pub struct StepRegistry {
    types: Vec<StepType>,
}

impl Default for StepRegistry {
    fn default() -> Self {
        let types = [
            ("Ethereum → Terra", StepKind::EthereumToTerra),
            ("Terra → Ethereum", StepKind::TerraToEthereum),
            ("Terra → Solana", StepKind::TerraToSolana),
            ("Solana → Terra", StepKind::SolanaToTerra),
            ("Swap on Ethereum", StepKind::SwapOnEthereum),
            ("Deposit to Anchor", StepKind::DepositToAnchor),
        ]
        .into_iter()
        .map(|(title, kind)| StepType {
            title: title.to_string(),
            kind,
        })
        .collect();

        Self { types }
    }
}

impl StepRegistry {
    pub fn list(&self) -> &[StepType] {
        &self.types
    }

    pub fn by_index(&self, index: usize) -> BridgeResult<&StepType> {
        self.types
            .get(index)
            .ok_or_else(|| BridgeError::not_found(format!("Step type #{}", index)))
    }

    pub fn by_title(&self, title: &str) -> BridgeResult<&StepType> {
        self.types
            .iter()
            .find(|t| t.title == title)
            .ok_or_else(|| BridgeError::not_found(format!("Step type '{}'", title)))
    }
}
