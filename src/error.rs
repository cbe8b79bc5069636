/// Discovery could not produce a topology at all
///
/// Individual region or service failures never surface here; they only shrink
/// the snapshot.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("failed to resolve account id: {0:#}")]
    Account(anyhow::Error),

    #[error("failed to list regions: {0:#}")]
    Regions(anyhow::Error),

    #[error("all {units} discovery fetches failed")]
    AllFetchesFailed { units: usize },
}
