//! Transaction records as captured by the collector
//!
//! Field names follow the collector's JSON (camelCase). Every numeric field
//! may be absent; absent values are imputed later by the feature builder.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Jupiter aggregator program ID
pub const JUPITER_PROGRAM_ID: &str = "JUP6LkbZbjS1jKKwapdHNy74zcZ3tLUZoi5QNyVTaV4";

/// Raydium AMM program ID
pub const RAYDIUM_PROGRAM_ID: &str = "675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8";

/// One observed transaction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub program_id: Option<String>,
    #[serde(default)]
    pub instruction_count: Option<f64>,
    #[serde(default)]
    pub account_count: Option<f64>,
    #[serde(default)]
    pub data_size: Option<f64>,
    #[serde(default)]
    pub priority_fee: Option<f64>,
    #[serde(default)]
    pub network_congestion: Option<f64>,
    #[serde(default)]
    pub compute_units_used: Option<f64>,
    #[serde(default)]
    pub slot_time: Option<f64>,
}

/// Which record field carries the program identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgramKey {
    /// `program`
    Program,
    /// `programId`
    ProgramId,
    /// `programId`, falling back to `program`
    Auto,
}

impl ProgramKey {
    pub fn resolve<'a>(&self, record: &'a TransactionRecord) -> Option<&'a str> {
        match self {
            ProgramKey::Program => record.program.as_deref(),
            ProgramKey::ProgramId => record.program_id.as_deref(),
            ProgramKey::Auto => record
                .program_id
                .as_deref()
                .or(record.program.as_deref()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProgramKey::Program => "program",
            ProgramKey::ProgramId => "programId",
            ProgramKey::Auto => "auto",
        }
    }
}

impl fmt::Display for ProgramKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProgramKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "program" => Ok(ProgramKey::Program),
            "programId" | "program_id" => Ok(ProgramKey::ProgramId),
            "auto" => Ok(ProgramKey::Auto),
            other => Err(format!("unknown program key '{}'", other)),
        }
    }
}
