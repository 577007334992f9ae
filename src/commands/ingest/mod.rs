pub(crate) mod chunker;
mod run;

pub(crate) use run::run;
