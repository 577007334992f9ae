pub mod collaborators;
pub mod extract;
pub mod index;
pub mod ingest;
pub mod query;
pub mod serve;
pub mod status;
