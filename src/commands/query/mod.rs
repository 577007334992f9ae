pub(crate) mod grounding;
mod output;
pub(crate) mod pipeline;
pub(crate) mod retrieval;
mod run;
#[cfg(test)]
mod tests;

pub(crate) use run::{open_index, run};
