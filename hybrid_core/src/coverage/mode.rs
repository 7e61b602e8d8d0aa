use std::{fmt, str::FromStr};
use thiserror::Error;

/// Exploration mode, decides what a unit of coverage is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CovMode {
    /// Branch alone.
    Inst,
    /// Branch and index of the transaction that hit it.
    InstTx,
    /// Branch, transaction index and storage digest.
    InstSg,
    /// Whole path.
    Path,
    /// Whole path, sub-paths of known paths are redundant.
    PathRelaxed,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModeError {
    #[error("unsupported coverage mode '{0}', expected one of: inst, inst-tx, inst-sg, path, path-relaxed")]
    Unknown(String),
}

impl CovMode {
    pub const ALL: [CovMode; 5] = [
        CovMode::Inst,
        CovMode::InstTx,
        CovMode::InstSg,
        CovMode::Path,
        CovMode::PathRelaxed,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CovMode::Inst => "inst",
            CovMode::InstTx => "inst-tx",
            CovMode::InstSg => "inst-sg",
            CovMode::Path => "path",
            CovMode::PathRelaxed => "path-relaxed",
        }
    }

    #[inline]
    pub fn is_path(self) -> bool {
        matches!(self, CovMode::Path | CovMode::PathRelaxed)
    }

    #[inline]
    pub fn needs_storage(self) -> bool {
        self == CovMode::InstSg
    }
}

impl FromStr for CovMode {
    type Err = ModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|m| m.name() == s)
            .ok_or_else(|| ModeError::Unknown(s.to_string()))
    }
}

impl fmt::Display for CovMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_modes() {
        for m in CovMode::ALL.iter() {
            assert_eq!(m.name().parse::<CovMode>().unwrap(), *m);
        }
        assert_eq!(
            "inst-inc".parse::<CovMode>(),
            Err(ModeError::Unknown("inst-inc".to_string()))
        );
        assert!("".parse::<CovMode>().is_err());
        assert!("INST".parse::<CovMode>().is_err());
    }
}
