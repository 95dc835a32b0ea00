pub mod authors;
pub mod config;
pub mod filename;
pub mod git;
pub mod inline;
pub mod links;
pub mod migrate;
pub mod paths;
pub mod runtime;
pub mod store;
pub mod transcode;
