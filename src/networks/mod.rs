use std::sync::Arc;

use crate::config::ResolvedConfig;
use crate::domain::{Network, RawSiteRecord};
use crate::error::FluxError;

pub mod icos;
pub mod listing;

pub use icos::{IcosAdapter, SparqlClient, SparqlHttpClient};
pub use listing::{ListingAdapter, ListingLayout};

/// One network's metadata source. Implementations read their listing and
/// metadata cache and emit sites in listing order.
pub trait NetworkAdapter {
    fn network(&self) -> Network;
    fn load(&self) -> Result<Vec<RawSiteRecord>, FluxError>;
}

/// Builds the adapters for `config.networks`, in configured order.
pub fn build_adapters(
    config: &ResolvedConfig,
    sparql: Arc<dyn SparqlClient>,
) -> Vec<Box<dyn NetworkAdapter>> {
    config
        .networks
        .iter()
        .map(|network| build_adapter(*network, config, sparql.clone()))
        .collect()
}

pub fn build_adapter(
    network: Network,
    config: &ResolvedConfig,
    sparql: Arc<dyn SparqlClient>,
) -> Box<dyn NetworkAdapter> {
    match network {
        Network::Ameriflux => Box::new(ListingAdapter::new(network, &config.ameriflux)),
        Network::Ozflux => Box::new(ListingAdapter::new(network, &config.ozflux)),
        Network::Icos => Box::new(IcosAdapter::new(&config.icos, sparql)),
    }
}
