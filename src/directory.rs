use crate::db_types::Tradie;
use crate::error::AppError;

use async_trait::async_trait;
use tracing::{debug, error, info};

/// Lookup from a dialed virtual number to the tradie who owns it
#[async_trait]
pub trait TradieDirectory: Send + Sync {
    async fn by_virtual_number(&self, number: &str) -> Option<Tradie>;
}

pub struct StaticTradieDirectory {
    tradies: Vec<Tradie>,
}

impl StaticTradieDirectory {
    pub fn new(tradies: Vec<Tradie>) -> Self {
        Self { tradies }
    }

    /// Load a JSON list of tradies
    pub async fn from_file(path: &str) -> Result<Self, AppError> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            error!(error=%e, path=%path, "failed to read tradie directory");
            AppError::Config(format!("cannot read {path}: {e}"))
        })?;
        let tradies = serde_json::from_str::<Vec<Tradie>>(&raw).map_err(|e| {
            error!(error=%e, path=%path, "failed to parse tradie directory");
            AppError::Config(format!("cannot parse {path}: {e}"))
        })?;
        info!(count = tradies.len(), "loaded tradie directory");
        Ok(Self::new(tradies))
    }

    pub fn demo() -> Self {
        Self::new(vec![Tradie {
            id: "TRADIE_101".to_string(),
            name: "Tom's Plumbing".to_string(),
            virtual_number: "+61400555666".to_string(),
            real_mobile: "+61499888777".to_string(),
            auto_create_jobs: false,
        }])
    }
}

#[async_trait]
impl TradieDirectory for StaticTradieDirectory {
    async fn by_virtual_number(&self, number: &str) -> Option<Tradie> {
        let number = number.trim();
        let tradie = self
            .tradies
            .iter()
            .find(|t| t.virtual_number == number)
            .cloned();
        debug!(number=%number, found = tradie.is_some(), "tradie lookup");
        tradie
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_matches_exact_virtual_number() {
        let directory = StaticTradieDirectory::demo();
        let tradie = directory.by_virtual_number(" +61400555666 ").await.unwrap();
        assert_eq!(tradie.real_mobile, "+61499888777");
        assert!(directory.by_virtual_number("+61400000000").await.is_none());
        assert!(directory.by_virtual_number("").await.is_none());
    }

    #[test]
    fn directory_file_uses_camel_case() {
        let raw = r#"[{"id":"T1","name":"Spark Bros","virtualNumber":"+611","realMobile":"+612","autoCreateJobs":true}]"#;
        let tradies: Vec<Tradie> = serde_json::from_str(raw).unwrap();
        assert!(tradies[0].auto_create_jobs);
        assert_eq!(tradies[0].real_mobile, "+612");
    }
}
