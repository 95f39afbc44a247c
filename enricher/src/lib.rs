pub mod budget;
pub mod channel;
pub mod delivery;
pub mod enricher_config;
pub mod error;
pub mod observability;
pub mod pipeline;
pub mod prompt;
pub mod rate_limiters;
pub mod report;
pub mod store;
pub mod youtube;

#[cfg(test)]
mod testing;

pub type HttpClient = reqwest::Client;
